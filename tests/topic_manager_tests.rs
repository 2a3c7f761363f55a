use std::time::{Duration, Instant};

use segmq::brokers::topic::message::{MessageType, HEADER_ERROR};
use segmq::brokers::topic::Topic;
use tokio::sync::mpsc;
mod helpers;
use helpers::{
    find_request, payload_str, pull_request, push_request, recv_n, seek_request, setup_manager,
    Benchmark,
};

const WAIT: Duration = Duration::from_secs(3);

mod features {
    use super::*;

    #[tokio::test]
    async fn test_pull_times_out_with_placeholders() {
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        fx.manager.handle(pull_request("convert", "p", "c1", 2, 100), &tx);

        let responses = recv_n(&mut rx, 2, WAIT).await;
        assert!(started.elapsed() >= Duration::from_millis(90));
        for response in &responses {
            assert_eq!(response.kind, MessageType::ResPull);
            assert_eq!(response.error(), Some("timed out waiting for data"));
            assert_eq!(response.client_id(), Some("c1"));
        }

        // Exactly one answer per request.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pull_pads_partial_result() {
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        fx.manager.handle(push_request("join", "p", "first"), &tx);
        let ack = recv_n(&mut rx, 1, WAIT).await;
        assert_eq!(ack[0].offset(), 0);

        fx.manager.handle(pull_request("join", "p", "c1", 3, 100), &tx);
        let responses = recv_n(&mut rx, 3, WAIT).await;

        assert!(!responses[0].is_error());
        assert_eq!(responses[0].offset(), 0);
        assert_eq!(payload_str(&responses[0]).as_deref(), Some("first"));
        assert_eq!(responses[0].header("count"), Some("3"));
        assert!(responses[1].is_error());
        assert!(responses[2].is_error());
    }

    #[tokio::test]
    async fn test_pull_completes_immediately_when_data_is_there() {
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for body in ["a", "b"] {
            fx.manager.handle(push_request("convert", "p", body), &tx);
        }
        recv_n(&mut rx, 2, WAIT).await;

        let started = Instant::now();
        fx.manager.handle(pull_request("convert", "p", "c1", 2, 5_000), &tx);
        let responses = recv_n(&mut rx, 2, WAIT).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let bodies: Vec<_> = responses.iter().filter_map(payload_str).collect();
        assert_eq!(bodies, vec!["a", "b"]);
        assert_eq!(fx.memory.count("p"), 0);
    }

    #[tokio::test]
    async fn test_long_poll_woken_by_push() {
        let fx = setup_manager();
        let (pull_tx, mut pull_rx) = mpsc::unbounded_channel();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();

        fx.manager.handle(pull_request("join", "p", "c1", 1, 5_000), &pull_tx);
        assert_eq!(fx.disk.subscriptions().pending("p"), 1);

        let started = Instant::now();
        fx.manager.handle(push_request("join", "p", "late"), &push_tx);
        recv_n(&mut push_rx, 1, WAIT).await;

        let response = recv_n(&mut pull_rx, 1, WAIT).await.remove(0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!response.is_error());
        assert_eq!(payload_str(&response).as_deref(), Some("late"));
        assert_eq!(fx.disk.subscriptions().pending("p"), 0);
    }

    #[tokio::test]
    async fn test_waiters_are_served_round_robin() {
        let fx = setup_manager();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (push_tx, _push_rx) = mpsc::unbounded_channel();

        fx.manager.handle(pull_request("convert", "p", "a", 1, 5_000), &a_tx);
        fx.manager.handle(pull_request("convert", "p", "b", 1, 5_000), &b_tx);

        // 1. First push goes to the first waiter only
        fx.manager.handle(push_request("convert", "p", "one"), &push_tx);
        let a = recv_n(&mut a_rx, 1, WAIT).await.remove(0);
        assert_eq!(payload_str(&a).as_deref(), Some("one"));
        assert!(b_rx.try_recv().is_err());

        // 2. Second push goes to the next waiter
        fx.manager.handle(push_request("convert", "p", "two"), &push_tx);
        let b = recv_n(&mut b_rx, 1, WAIT).await.remove(0);
        assert_eq!(payload_str(&b).as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_disconnected_waiter_leaves_record_for_next_one() {
        let fx = setup_manager();
        let (gone_tx, gone_rx) = mpsc::unbounded_channel();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let (push_tx, _push_rx) = mpsc::unbounded_channel();

        fx.manager.handle(pull_request("convert", "p", "gone", 1, 5_000), &gone_tx);
        fx.manager.handle(pull_request("convert", "p", "live", 1, 5_000), &live_tx);
        drop(gone_rx);

        fx.manager.handle(push_request("convert", "p", "kept"), &push_tx);
        let response = recv_n(&mut live_rx, 1, WAIT).await.remove(0);
        assert_eq!(payload_str(&response).as_deref(), Some("kept"));
        assert_eq!(fx.memory.subscriptions().pending("p"), 0);
    }

    #[tokio::test]
    async fn test_disconnected_waiter_consumes_nothing() {
        let fx = setup_manager();
        let (gone_tx, gone_rx) = mpsc::unbounded_channel();
        let (push_tx, _push_rx) = mpsc::unbounded_channel();

        fx.manager.handle(pull_request("convert", "p", "gone", 1, 5_000), &gone_tx);
        drop(gone_rx);

        fx.manager.handle(push_request("convert", "p", "kept"), &push_tx);
        assert_eq!(fx.memory.count("p"), 1);
        assert_eq!(fx.memory.subscriptions().pending("p"), 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        fx.manager.handle(pull_request("convert", "p", "next", 1, 0), &tx);
        let response = recv_n(&mut rx, 1, WAIT).await.remove(0);
        assert_eq!(payload_str(&response).as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_find_waits_for_matching_record() {
        let fx = setup_manager();
        let (find_tx, mut find_rx) = mpsc::unbounded_channel();
        let (push_tx, _push_rx) = mpsc::unbounded_channel();

        fx.manager.handle(find_request("convert", "p", "job.id", "7", 5_000), &find_tx);

        // A non-matching push keeps the find parked.
        fx.manager.handle(push_request("convert", "p", "x").with_header("job.id", "3"), &push_tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(find_rx.try_recv().is_err());

        fx.manager.handle(push_request("convert", "p", "y").with_header("job.id", "7"), &push_tx);
        let response = recv_n(&mut find_rx, 1, WAIT).await.remove(0);
        assert_eq!(response.kind, MessageType::ResFind);
        assert_eq!(response.offset(), 2);
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn test_find_timeout_answers_minus_one() {
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        fx.manager.handle(find_request("join", "p", "job.id", "1", 50), &tx);
        let response = recv_n(&mut rx, 1, WAIT).await.remove(0);
        assert_eq!(response.kind, MessageType::ResFind);
        assert_eq!(response.offset(), -1);
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_seek_validates_against_disk_bounds() {
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for body in ["a", "b", "c"] {
            fx.manager.handle(push_request("join", "p", body), &tx);
        }
        recv_n(&mut rx, 3, WAIT).await;

        fx.manager.handle(seek_request("join", "p", "c1", 9), &tx);
        let rejected = recv_n(&mut rx, 1, WAIT).await.remove(0);
        assert_eq!(rejected.kind, MessageType::ResSeek);
        assert!(rejected.is_error());

        fx.manager.handle(seek_request("join", "p", "c1", 2), &tx);
        let accepted = recv_n(&mut rx, 1, WAIT).await.remove(0);
        assert!(!accepted.is_error());

        fx.manager.handle(pull_request("join", "p", "c1", 1, 0), &tx);
        let pulled = recv_n(&mut rx, 1, WAIT).await.remove(0);
        assert_eq!(payload_str(&pulled).as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_unknown_topic_answers_every_slot() {
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        fx.manager.handle(pull_request("missing", "p", "c1", 3, 1_000), &tx);
        let responses = recv_n(&mut rx, 3, WAIT).await;
        for response in responses {
            assert_eq!(response.kind, MessageType::ResPull);
            assert_eq!(response.header(HEADER_ERROR), Some("topic 'missing' not found"));
        }

        fx.manager.handle(push_request("missing", "p", "x"), &tx);
        let push = recv_n(&mut rx, 1, WAIT).await.remove(0);
        assert_eq!(push.kind, MessageType::ResPush);
        assert!(push.is_error());
    }
}

mod benchmarks {
    use super::*;

    #[tokio::test]
    async fn bench_memory_push_pull() {
        const COUNT: usize = 10_000;
        let fx = setup_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut bench = Benchmark::start("Memory push (TopicManager::handle)", COUNT);
        for i in 0..COUNT {
            let start = Instant::now();
            fx.manager.handle(push_request("convert", "bench", &i.to_string()), &tx);
            bench.record(start.elapsed());
        }
        bench.stop();
        recv_n(&mut rx, COUNT, WAIT).await;

        let mut bench = Benchmark::start("Memory pull x100 (TopicManager::handle)", COUNT / 100);
        for _ in 0..COUNT / 100 {
            let start = Instant::now();
            fx.manager.handle(pull_request("convert", "bench", "c1", 100, 0), &tx);
            recv_n(&mut rx, 100, WAIT).await;
            bench.record(start.elapsed());
        }
        bench.stop();
        assert_eq!(fx.memory.count("bench"), 0);
    }
}

//! Long-poll state for pull and find requests.
//!
//! A pending request is polled once on arrival, then re-polled every time a
//! push on its partition wakes it through the subscription queue. A timer
//! forces the answer when the deadline passes. Whichever side answers first
//! wins; the response is sent exactly once.
//!
//! Lock order: pending state, then topic storage. Topics never call back
//! into a waiter while holding their own locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::brokers::topic::errors::BrokerError;
use crate::brokers::topic::message::{Message, MessageType, HEADER_OFFSET};
use crate::brokers::topic::subscribe::Waiter;
use crate::brokers::topic::Topic;

/// Outbound side of a client connection.
pub type ResponseTx = mpsc::UnboundedSender<Message>;

// ========================================
// COMPLETION (write-once guard + timer)
// ========================================

#[derive(Default)]
struct Completion {
    responded: AtomicBool,
    cancelled: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Completion {
    fn is_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    fn is_settled(&self) -> bool {
        self.is_responded() || self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// The client went away: settle without answering.
    fn abandon(&self) {
        self.cancel();
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    /// True for the single caller allowed to send the response.
    fn claim(&self) -> bool {
        if self.responded.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        true
    }

    fn schedule(&self, timeout: Duration, on_expire: impl FnOnce() + Send + 'static) {
        if self.is_settled() {
            return;
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_expire();
        });
        let mut timer = self.timer.lock();
        if self.is_settled() {
            handle.abort();
        } else {
            *timer = Some(handle);
        }
    }
}

// ========================================
// PENDING PULL
// ========================================

#[derive(Default)]
struct PullState {
    pulled: Vec<Message>,
    subscribe_key: Option<u64>,
}

pub struct PendingPull {
    topic: Arc<dyn Topic>,
    partition: String,
    client_id: String,
    count: usize,
    request: Message,
    tx: ResponseTx,
    state: Mutex<PullState>,
    completion: Completion,
}

impl PendingPull {
    pub fn new(
        topic: Arc<dyn Topic>,
        partition: String,
        client_id: String,
        count: usize,
        request: Message,
        tx: ResponseTx,
    ) -> Arc<Self> {
        Arc::new(Self {
            topic,
            partition,
            client_id,
            count,
            request,
            tx,
            state: Mutex::new(PullState::default()),
            completion: Completion::default(),
        })
    }

    /// Polls once and arms the deadline if the request is still short.
    pub fn start(self: &Arc<Self>, timeout: Duration) {
        self.poll();
        let pending = Arc::clone(self);
        self.completion.schedule(timeout, move || pending.expire());
    }

    /// Takes what is available, answers once `count` is reached, otherwise
    /// parks at the tail of the partition queue. `false` once settled or
    /// when the client has disconnected; nothing is consumed then.
    pub fn poll(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock();
        if self.completion.is_settled() {
            return false;
        }
        state.subscribe_key = None;
        if self.tx.is_closed() {
            self.completion.abandon();
            return false;
        }

        self.gather(&mut state.pulled);
        if state.pulled.len() >= self.count {
            self.respond(&mut state);
        } else {
            let waiter: Arc<dyn Waiter> = Arc::clone(self) as Arc<dyn Waiter>;
            state.subscribe_key = Some(self.topic.subscribe(&self.partition, waiter));
        }
        true
    }

    /// Deadline reached: answer with what was gathered, padded with
    /// timeout placeholders.
    pub fn expire(&self) {
        self.completion.cancel();
        let mut state = self.state.lock();
        if let Some(key) = state.subscribe_key.take() {
            self.topic.unsubscribe(&self.partition, key);
        }
        self.respond(&mut state);
    }

    fn gather(&self, pulled: &mut Vec<Message>) {
        if pulled.len() >= self.count || self.topic.count(&self.partition) == 0 {
            return;
        }
        while pulled.len() < self.count {
            let Some(record) = self.topic.peek(&self.partition, &self.client_id) else {
                break;
            };
            let Some(offset) = record.offset() else {
                warn!(
                    "[Pull] '{}'/{}: stored record without offset",
                    self.topic.name(),
                    self.partition
                );
                break;
            };
            self.topic.commit(&self.partition, &self.client_id, offset);
            pulled.push(self.reply(record.message, offset));
        }
    }

    fn reply(&self, mut message: Message, offset: u64) -> Message {
        message.kind = MessageType::ResPull;
        message.merge_header(&self.request.header);
        message.set_header(HEADER_OFFSET, offset);
        message
    }

    fn placeholder(&self) -> Message {
        let mut message = self.request.clone();
        message.kind = MessageType::ResPull;
        message.payload = None;
        message.set_error(BrokerError::Timeout);
        message
    }

    fn respond(&self, state: &mut PullState) {
        if !self.completion.claim() {
            return;
        }
        let pulled = std::mem::take(&mut state.pulled);
        let missing = self.count.saturating_sub(pulled.len());
        for message in pulled {
            let _ = self.tx.send(message);
        }
        for _ in 0..missing {
            let _ = self.tx.send(self.placeholder());
        }
    }
}

impl Waiter for PendingPull {
    fn resume(self: Arc<Self>) -> bool {
        self.poll()
    }
}

// ========================================
// PENDING FIND
// ========================================

pub struct PendingFind {
    topic: Arc<dyn Topic>,
    partition: String,
    condition: HashMap<String, String>,
    request: Message,
    tx: ResponseTx,
    subscribe_key: Mutex<Option<u64>>,
    completion: Completion,
}

impl PendingFind {
    pub fn new(
        topic: Arc<dyn Topic>,
        partition: String,
        condition: HashMap<String, String>,
        request: Message,
        tx: ResponseTx,
    ) -> Arc<Self> {
        Arc::new(Self {
            topic,
            partition,
            condition,
            request,
            tx,
            subscribe_key: Mutex::new(None),
            completion: Completion::default(),
        })
    }

    pub fn start(self: &Arc<Self>, timeout: Duration) {
        self.poll();
        let pending = Arc::clone(self);
        self.completion.schedule(timeout, move || pending.expire());
    }

    pub fn poll(self: &Arc<Self>) -> bool {
        let mut key = self.subscribe_key.lock();
        if self.completion.is_settled() {
            return false;
        }
        *key = None;
        if self.tx.is_closed() {
            self.completion.abandon();
            return false;
        }

        match self.topic.find(&self.partition, &self.condition) {
            Some(offset) => self.respond(Some(offset)),
            None => {
                let waiter: Arc<dyn Waiter> = Arc::clone(self) as Arc<dyn Waiter>;
                *key = Some(self.topic.subscribe(&self.partition, waiter));
            }
        }
        true
    }

    pub fn expire(&self) {
        self.completion.cancel();
        if let Some(key) = self.subscribe_key.lock().take() {
            self.topic.unsubscribe(&self.partition, key);
        }
        self.respond(None);
    }

    fn respond(&self, offset: Option<u64>) {
        if !self.completion.claim() {
            return;
        }
        let mut message = self.request.clone();
        message.kind = MessageType::ResFind;
        message.payload = None;
        match offset {
            Some(offset) => {
                message.set_header(HEADER_OFFSET, offset);
            }
            None => {
                message.set_header(HEADER_OFFSET, -1);
                message.set_error(BrokerError::RecordNotFound);
            }
        }
        let _ = self.tx.send(message);
    }
}

impl Waiter for PendingFind {
    fn resume(self: Arc<Self>) -> bool {
        self.poll()
    }
}

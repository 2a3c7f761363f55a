//! Topic Manager: routes decoded requests to their topic.
//!
//! - push: store, answer with the offset, then wake one waiter
//! - pull / find: answer now or long-poll until data or deadline
//! - seek: move the client cursor
//!
//! Responses go to the connection's outbound channel, possibly from another
//! task when a long-poll completes later.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::brokers::topic::commands::TopicCommand;
use crate::brokers::topic::errors::BrokerError;
use crate::brokers::topic::message::{Message, MessageType, HEADER_OFFSET};
use crate::brokers::topic::pending::{PendingFind, PendingPull, ResponseTx};
use crate::brokers::topic::Topic;

pub struct TopicManager {
    topics: HashMap<String, Arc<dyn Topic>>,
}

impl TopicManager {
    /// A later topic with an already registered name replaces the earlier one.
    pub fn new(topics: impl IntoIterator<Item = Arc<dyn Topic>>) -> Self {
        let topics = topics
            .into_iter()
            .map(|topic| (topic.name().to_string(), topic))
            .collect();
        Self { topics }
    }

    pub fn topic(&self, name: &str) -> Option<Arc<dyn Topic>> {
        self.topics.get(name).cloned()
    }

    pub fn handle(&self, request: Message, tx: &ResponseTx) {
        if !request.kind.is_request() {
            debug!("[TopicManager] ignoring {:?} sent by a client", request.kind);
            return;
        }

        let command = match TopicCommand::parse(&request) {
            Ok(command) => command,
            Err(err) => return reject(request, err, 1, tx),
        };

        let Some(topic) = self.topic(command.topic()) else {
            let copies = match &command {
                TopicCommand::Pull { count, .. } => *count,
                _ => 1,
            };
            let err = BrokerError::TopicNotFound(command.topic().to_string());
            return reject(request, err, copies, tx);
        };

        match command {
            TopicCommand::Push { partition, .. } => push(topic, &partition, request, tx),
            TopicCommand::Pull {
                partition,
                client_id,
                count,
                timeout,
                ..
            } => {
                PendingPull::new(topic, partition, client_id, count, request, tx.clone())
                    .start(timeout);
            }
            TopicCommand::Find {
                partition,
                condition,
                timeout,
                ..
            } => {
                PendingFind::new(topic, partition, condition, request, tx.clone()).start(timeout);
            }
            TopicCommand::Seek {
                partition,
                client_id,
                offset,
                ..
            } => seek(topic, &partition, &client_id, offset, request, tx),
        }
    }
}

fn push(topic: Arc<dyn Topic>, partition: &str, request: Message, tx: &ResponseTx) {
    let mut response = response_to(&request);
    match topic.push(partition, request) {
        Ok(offset) => {
            response.set_header(HEADER_OFFSET, offset);
            let _ = tx.send(response);
            topic.notify(partition);
        }
        Err(err) => {
            warn!("[TopicManager] push to '{}'/{} failed: {}", topic.name(), partition, err);
            response.set_error(err);
            let _ = tx.send(response);
        }
    }
}

fn seek(
    topic: Arc<dyn Topic>,
    partition: &str,
    client_id: &str,
    offset: u64,
    request: Message,
    tx: &ResponseTx,
) {
    let mut response = response_to(&request);
    if !topic.seek(partition, client_id, offset) {
        response.set_error(BrokerError::Validation(format!(
            "offset {} is out of range",
            offset
        )));
    }
    let _ = tx.send(response);
}

fn reject(request: Message, err: BrokerError, copies: usize, tx: &ResponseTx) {
    debug!("[TopicManager] rejected {:?}: {}", request.kind, err);
    let mut response = response_to(&request);
    if request.kind == MessageType::ReqFind {
        response.set_header(HEADER_OFFSET, -1);
    }
    response.set_error(&err);
    for _ in 1..copies {
        let _ = tx.send(response.clone());
    }
    let _ = tx.send(response);
}

/// Copy of the request headers under the matching response kind.
fn response_to(request: &Message) -> Message {
    Message {
        kind: request.kind.response(),
        header: request.header.clone(),
        payload: None,
    }
}

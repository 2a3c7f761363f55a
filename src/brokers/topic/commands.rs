//! Topic commands: request headers validated into typed operations.

use std::collections::HashMap;
use std::time::Duration;

use crate::brokers::topic::errors::BrokerError;
use crate::brokers::topic::message::{
    Message, MessageType, HEADER_CLIENT_ID, HEADER_COUNT, HEADER_OFFSET, HEADER_PARTITION,
    HEADER_TOPIC_NAME,
};

/// Upper bound on records per pull; also bounds timeout placeholders.
pub const MAX_PULL_COUNT: i64 = 65_535;

#[derive(Debug, Clone, PartialEq)]
pub enum TopicCommand {
    Push {
        topic: String,
        partition: String,
    },
    Pull {
        topic: String,
        partition: String,
        client_id: String,
        count: usize,
        timeout: Duration,
    },
    Find {
        topic: String,
        partition: String,
        condition: HashMap<String, String>,
        timeout: Duration,
    },
    Seek {
        topic: String,
        partition: String,
        client_id: String,
        offset: u64,
    },
}

impl TopicCommand {
    pub fn parse(message: &Message) -> Result<Self, BrokerError> {
        let topic = message
            .topic_name()
            .ok_or_else(|| BrokerError::missing(HEADER_TOPIC_NAME))?
            .to_string();
        let partition = message
            .partition()
            .ok_or_else(|| BrokerError::missing(HEADER_PARTITION))?;
        validate_path_name(HEADER_PARTITION, partition)?;
        let partition = partition.to_string();

        match message.kind {
            MessageType::ReqPush => Ok(TopicCommand::Push { topic, partition }),
            MessageType::ReqPull => {
                let count = message.count();
                if !(1..=MAX_PULL_COUNT).contains(&count) {
                    return Err(BrokerError::Validation(format!(
                        "'{}' must be within 1..={}, got {}",
                        HEADER_COUNT, MAX_PULL_COUNT, count
                    )));
                }
                Ok(TopicCommand::Pull {
                    topic,
                    partition,
                    client_id: required_client_id(message)?,
                    count: count as usize,
                    timeout: Duration::from_millis(message.timeout_ms()),
                })
            }
            MessageType::ReqFind => Ok(TopicCommand::Find {
                topic,
                partition,
                condition: message.condition(),
                timeout: Duration::from_millis(message.timeout_ms()),
            }),
            MessageType::ReqSeek => {
                let client_id = required_client_id(message)?;
                let raw = message
                    .header(HEADER_OFFSET)
                    .ok_or_else(|| BrokerError::missing(HEADER_OFFSET))?;
                let offset = raw.parse::<u64>().map_err(|_| {
                    BrokerError::Validation(format!(
                        "'{}' must be a non-negative integer, got '{}'",
                        HEADER_OFFSET, raw
                    ))
                })?;
                Ok(TopicCommand::Seek {
                    topic,
                    partition,
                    client_id,
                    offset,
                })
            }
            other => Err(BrokerError::Validation(format!(
                "{:?} is not a request",
                other
            ))),
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            TopicCommand::Push { topic, .. }
            | TopicCommand::Pull { topic, .. }
            | TopicCommand::Find { topic, .. }
            | TopicCommand::Seek { topic, .. } => topic,
        }
    }
}

fn required_client_id(message: &Message) -> Result<String, BrokerError> {
    message
        .client_id()
        .map(String::from)
        .ok_or_else(|| BrokerError::missing(HEADER_CLIENT_ID))
}

/// Topic and partition names become directory names on disk.
pub fn validate_path_name(field: &str, value: &str) -> Result<(), BrokerError> {
    if value.is_empty() {
        return Err(BrokerError::missing(field));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(BrokerError::Validation(format!(
            "{} '{}' contains a path separator or '..'",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: MessageType) -> Message {
        Message::new(kind).with_topic("jobs").with_partition("p-1")
    }

    #[test]
    fn pull_defaults_and_required_fields() {
        let cmd = TopicCommand::parse(&request(MessageType::ReqPull).with_client_id("c1")).unwrap();
        assert_eq!(
            cmd,
            TopicCommand::Pull {
                topic: "jobs".into(),
                partition: "p-1".into(),
                client_id: "c1".into(),
                count: 1,
                timeout: Duration::ZERO,
            }
        );

        let err = TopicCommand::parse(&request(MessageType::ReqPull)).unwrap_err();
        assert_eq!(err.to_string(), "invalid request: missing header 'client.id'");

        let zero = request(MessageType::ReqPull).with_client_id("c1").with_count(0);
        assert!(matches!(TopicCommand::parse(&zero), Err(BrokerError::Validation(_))));

        let huge = request(MessageType::ReqPull)
            .with_client_id("c1")
            .with_count(MAX_PULL_COUNT + 1);
        assert!(TopicCommand::parse(&huge).is_err());
    }

    #[test]
    fn seek_requires_non_negative_offset() {
        let base = request(MessageType::ReqSeek).with_client_id("c1");
        assert!(TopicCommand::parse(&base).is_err());
        assert!(TopicCommand::parse(&base.clone().with_offset(-1)).is_err());

        let cmd = TopicCommand::parse(&base.with_offset(5)).unwrap();
        assert!(matches!(cmd, TopicCommand::Seek { offset: 5, .. }));
    }

    #[test]
    fn find_collects_condition() {
        let msg = request(MessageType::ReqFind)
            .with_condition("job.id", "9")
            .with_timeout_ms(250);
        match TopicCommand::parse(&msg).unwrap() {
            TopicCommand::Find { condition, timeout, .. } => {
                assert_eq!(condition.get("job.id").map(String::as_str), Some("9"));
                assert_eq!(timeout, Duration::from_millis(250));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_unsafe_partitions_and_responses() {
        for bad in ["../etc", "a/b", "a\\b"] {
            let msg = Message::new(MessageType::ReqPush).with_topic("jobs").with_partition(bad);
            assert!(TopicCommand::parse(&msg).is_err(), "{}", bad);
        }
        assert!(TopicCommand::parse(&request(MessageType::ResPush)).is_err());
        assert!(TopicCommand::parse(&Message::new(MessageType::ReqPush).with_partition("p")).is_err());
    }
}

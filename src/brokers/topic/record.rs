use std::collections::HashMap;

use crate::brokers::topic::message::Message;
use crate::utils::{age_ms, current_time_ms};

/// A stored message plus the time it entered the topic.
#[derive(Debug, Clone)]
pub struct TopicRecord {
    pub message: Message,
    pub created_at: u64,
}

impl TopicRecord {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            created_at: current_time_ms(),
        }
    }

    pub fn with_created_at(message: Message, created_at: u64) -> Self {
        Self { message, created_at }
    }

    pub fn is_expired(&self, retention_ms: u64) -> bool {
        age_ms(self.created_at) > retention_ms
    }

    /// Offset stamped into the header at push time.
    pub fn offset(&self) -> Option<u64> {
        self.message.offset().try_into().ok()
    }

    /// True when every condition key is present in the header with an equal value.
    pub fn matches(&self, condition: &HashMap<String, String>) -> bool {
        condition
            .iter()
            .all(|(key, value)| self.message.header.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::topic::message::MessageType;

    fn record() -> TopicRecord {
        TopicRecord::new(
            Message::new(MessageType::ReqPush)
                .with_header("job.id", "42")
                .with_header("stage", "done")
                .with_offset(3),
        )
    }

    #[test]
    fn empty_condition_matches_everything() {
        assert!(record().matches(&HashMap::new()));
    }

    #[test]
    fn condition_is_a_subset_match() {
        let mut condition = HashMap::new();
        condition.insert("job.id".to_string(), "42".to_string());
        assert!(record().matches(&condition));

        condition.insert("stage".to_string(), "running".to_string());
        assert!(!record().matches(&condition));

        let mut missing = HashMap::new();
        missing.insert("owner".to_string(), "x".to_string());
        assert!(!record().matches(&missing));
    }

    #[test]
    fn expiry_uses_creation_time() {
        let old = TopicRecord::with_created_at(record().message, current_time_ms() - 1_000);
        assert!(old.is_expired(500));
        assert!(!old.is_expired(5_000));
        assert_eq!(old.offset(), Some(3));
    }
}

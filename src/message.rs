//! Message envelope and per-message retry state.
//!
//! A [`Message`] is the caller-supplied payload and never changes after
//! submission. A [`Record`] wraps a message with the scheduling state that
//! the engine mutates and the object store persists: attempt counter, next
//! due time, lifecycle status, and timestamps.
//!
//! Timestamps are wall-clock seconds since the Unix epoch with fractional
//! precision, which is also how they appear in persisted documents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Caller-supplied delivery envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier chosen by the caller.
    pub message_id: String,
    /// Text to deliver.
    pub content: String,
    /// Optional free-form annotations, carried through untouched.
    pub metadata: Option<HashMap<String, String>>,
}

/// Lifecycle status of a record.
///
/// `Pending` records live in the engine and under the active prefix; the
/// terminal statuses exist only in terminal documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Succeeded,
    Failed,
}

/// The scheduled and persisted unit: one per submitted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub message_id: String,
    pub message: Message,
    /// Failed sender invocations so far; 0 before the first attempt.
    pub attempt_count: u32,
    /// Absolute instant the next attempt is due.
    pub next_retry_at: f64,
    pub status: Status,
    pub created_at: f64,
    pub updated_at: f64,
}

impl Record {
    /// A fresh record due immediately.
    pub fn new(message: Message, now: f64) -> Self {
        Self {
            message_id: message.message_id.clone(),
            message,
            attempt_count: 0,
            next_retry_at: now,
            status: Status::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// `updated_at` in integer milliseconds, used in terminal document keys
    /// so a prefix listing is naturally chronological.
    pub fn epoch_millis(&self) -> u64 {
        (self.updated_at * 1000.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new(
            Message {
                message_id: "m1".to_owned(),
                content: "hello".to_owned(),
                metadata: None,
            },
            1000.25,
        )
    }

    #[test]
    fn new_record_is_due_immediately() {
        let record = record();
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.next_retry_at, record.created_at);
        assert_eq!(record.created_at, 1000.25);
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&Status::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&Status::Succeeded).unwrap(),
            "\"SUCCEEDED\""
        );
        assert_eq!(serde_json::to_string(&Status::Failed).unwrap(), "\"FAILED\"");
    }

    #[test]
    fn document_round_trips_and_ignores_unknown_fields() {
        let record = record();
        let mut value = serde_json::to_value(&record).unwrap();
        assert!(value.get("message").unwrap().get("metadata").is_some());

        value
            .as_object_mut()
            .unwrap()
            .insert("extra".to_owned(), serde_json::json!("ignored"));
        let parsed: Record = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn epoch_millis_rounds_fractional_seconds() {
        let mut record = record();
        record.updated_at = 1000.01;
        assert_eq!(record.epoch_millis(), 1000010);
    }
}

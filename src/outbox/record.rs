use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::transport::{Headers, MESSAGE_ID_HEADER};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing event, written in the same transaction as the business change.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct OutboxRecord {
    pub id: String,
    pub channel: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: Headers,
    pub status: OutboxStatus,
    pub created_at: SystemTime,
    pub processed_at: Option<SystemTime>,
    pub error: Option<String>,
}

impl OutboxRecord {
    /// Create a pending record with a fresh identifier.
    pub fn new(channel: impl Into<String>, payload: Value, headers: Headers) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            payload,
            headers,
            status: OutboxStatus::Pending,
            created_at: SystemTime::now(),
            processed_at: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }

    /// Copy the record id into the headers under the deduplication key.
    pub fn stamp_message_id(&mut self) {
        self.headers
            .insert(MESSAGE_ID_HEADER.to_string(), self.id.clone());
    }

    /// Pending → Published. Returns `false` if the record had already left Pending.
    pub fn mark_published(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = OutboxStatus::Published;
        self.processed_at = Some(SystemTime::now());
        true
    }

    /// Pending → Failed. Returns `false` if the record had already left Pending.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        let error = error.into();
        self.status = OutboxStatus::Failed;
        self.processed_at = Some(SystemTime::now());
        self.error = Some(if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        true
    }
}

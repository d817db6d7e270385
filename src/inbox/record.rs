use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::{Headers, IncomingMessage};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboxStatus {
    Pending,
    Processed,
    Failed,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "PENDING",
            InboxStatus::Processed => "PROCESSED",
            InboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication ledger entry for one inbound message id.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct InboxRecord {
    pub id: String,
    pub channel: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: Headers,
    pub status: InboxStatus,
    pub created_at: SystemTime,
    pub processed_at: Option<SystemTime>,
    pub error: Option<String>,
}

impl InboxRecord {
    /// Reserve `id` for a message that is about to be handled.
    pub fn reserve(id: impl Into<String>, message: &IncomingMessage) -> Self {
        Self {
            id: id.into(),
            channel: message.channel.clone(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            status: InboxStatus::Pending,
            created_at: SystemTime::now(),
            processed_at: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InboxStatus::Pending
    }

    pub fn is_processed(&self) -> bool {
        self.status == InboxStatus::Processed
    }

    pub fn is_failed(&self) -> bool {
        self.status == InboxStatus::Failed
    }

    /// Pending → Processed. Returns `false` if the record had already left Pending.
    pub fn mark_processed(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = InboxStatus::Processed;
        self.processed_at = Some(SystemTime::now());
        true
    }

    /// Pending → Failed. Returns `false` if the record had already left Pending.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        let error = error.into();
        self.status = InboxStatus::Failed;
        self.processed_at = Some(SystemTime::now());
        self.error = Some(if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        true
    }
}

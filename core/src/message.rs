//! The message envelope: the shared shape of all bus traffic.
//!
//! RULE: `timestamp` is set by whoever builds the envelope.
//! Consumers read it; they never infer or overwrite it.
//!
//! Commands (intents) and domain events (facts) are closed enums.
//! Each enum exposes a `Kind` discriminant used as the routing key,
//! so handler registration and payload shape are checked together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, hash::Hash};
use uuid::Uuid;

/// A closed catalog of messages routed by kind.
pub trait Message: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// A catalog of facts. Every catalog must be able to express a failed command,
/// since that is the only error channel the command bus exposes.
pub trait DomainEvent: Message {
    fn command_failed(command_type: String, reason: String) -> Self;
}

/// Serializes flat: `{ type, payload, timestamp, metadata? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    #[serde(flatten)]
    pub message:   M,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata:  Option<Metadata>,
}

impl<M: Message> Envelope<M> {
    pub fn new(message: M, timestamp: DateTime<Utc>) -> Self {
        Self { message, timestamp, metadata: None }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn kind(&self) -> M::Kind {
        self.message.kind()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.correlation_id.as_deref()
    }
}

/// Open-ended envelope metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id:        Option<String>,
    #[serde(flatten)]
    pub extra:          serde_json::Map<String, serde_json::Value>,
}

impl Metadata {
    /// Metadata carrying a fresh random correlation id.
    pub fn correlated() -> Self {
        Self::for_correlation(Uuid::new_v4().to_string())
    }

    pub fn for_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

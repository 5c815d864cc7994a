//! Wire messages for the `/sync` endpoint.
//!
//! All messages are JSON with camelCase field names:
//!
//! ```text
//! GET  /sync?last_pulled_at=<ts>   -> PullResponse { changes, timestamp }
//! POST /sync  PushRequest          -> PushResponse { acks }
//! ```

use serde::{Deserialize, Serialize};

use till_core::{EntityChange, MutationId, MutationKind, MutationPayload, MutationRecord};

/// Limits on message sizes.
pub mod limits {
    /// Max mutations in one push request.
    pub const MAX_PUSH_BATCH: usize = 500;
    /// Max changes accepted in one pull response.
    pub const MAX_PULL_CHANGES: usize = 10_000;
}

/// A mutation as sent to the server. The id is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMutation {
    pub id: MutationId,
    pub kind: MutationKind,
    pub payload: MutationPayload,
    pub created_at: i64,
}

impl From<&MutationRecord> for WireMutation {
    fn from(record: &MutationRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            payload: record.payload.clone(),
            created_at: record.created_at,
        }
    }
}

/// Body of `POST /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub changes: Vec<WireMutation>,
    pub last_pulled_at: Option<i64>,
}

/// Per-mutation outcome reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Applied now.
    Accepted,
    /// Already applied earlier under the same id.
    Duplicate,
    /// Invalid payload; retrying cannot succeed.
    Rejected,
    /// Not applied this time; retry later.
    Failed,
}

impl AckStatus {
    /// Whether the server holds the mutation's effect.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, AckStatus::Accepted | AckStatus::Duplicate)
    }
}

/// Acknowledgment for one pushed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub id: MutationId,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PushAck {
    pub fn new(id: MutationId, status: AckStatus) -> Self {
        Self {
            id,
            status,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Response to `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub acks: Vec<PushAck>,
}

impl PushResponse {
    /// The ack for `id`, if the server reported one.
    pub fn ack_for(&self, id: &MutationId) -> Option<&PushAck> {
        self.acks.iter().find(|ack| &ack.id == id)
    }
}

/// Response to `GET /sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<EntityChange>,
    /// Server time the pull was taken at; becomes the next cursor.
    pub timestamp: i64,
}

impl PullResponse {
    /// Check the response against [`limits`].
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        if self.changes.len() > limits::MAX_PULL_CHANGES {
            return Err("too many changes in pull response");
        }
        Ok(())
    }
}

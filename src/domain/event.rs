//! Inbound provider event, as kept by the event ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Processing attempts allowed before an event is held for manual review.
pub const MAX_PROCESSING_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: Uuid,
    pub channel_id: String,
    pub event_type: String,
    /// Raw body, stored verbatim.
    pub payload: String,
    pub payload_digest: String,
    pub processed: bool,
    pub processing_attempts: i32,
    pub processing_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(channel_id: String, event_type: String, payload: String) -> Self {
        let now = Utc::now();
        let payload_digest = payload_digest(&payload);
        Self {
            id: Uuid::new_v4(),
            channel_id,
            event_type,
            payload,
            payload_digest,
            processed: false,
            processing_attempts: 0,
            processing_error: None,
            received_at: now,
            updated_at: now,
        }
    }

    /// Eligible for automatic reprocessing.
    pub fn is_retryable(&self) -> bool {
        !self.processed && self.processing_attempts < MAX_PROCESSING_ATTEMPTS
    }

    /// Exhausted its attempts without being processed.
    pub fn is_stalled(&self) -> bool {
        !self.processed && self.processing_attempts >= MAX_PROCESSING_ATTEMPTS
    }
}

/// Hex SHA-256 of the raw body; identical redeliveries share a digest.
pub fn payload_digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

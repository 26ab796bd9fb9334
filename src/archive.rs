//! Terminal-session archive
//!
//! Decided and failed sessions are archived with a SHA-256 hash of their
//! full transcript so stored deliberations can be integrity-checked later.

use crate::error::Result;
use crate::models::{FailureReport, SessionOutcome, SessionStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Archived terminal state of one deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationRecord {
    pub session_id: Uuid,
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub status: SessionStatus,
    pub outcome: Option<SessionOutcome>,
    pub failure: Option<FailureReport>,
    pub transcript_hash: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait SessionArchive: Send + Sync {
    async fn record(&self, record: DeliberationRecord) -> Result<Uuid>;
    async fn get(&self, session_id: Uuid) -> Result<Option<DeliberationRecord>>;
    async fn list(&self) -> Result<Vec<Uuid>>;
}

/// In-memory archive for development and tests.
pub struct InMemoryArchive {
    records: Arc<RwLock<HashMap<Uuid, DeliberationRecord>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Recompute the hash of a stored record's transcript and compare with
    /// the hash captured at archive time.
    pub async fn verify_integrity(&self, session_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        if let Some(record) = records.get(&session_id) {
            let transcript = record
                .outcome
                .as_ref()
                .map(|o| o.full_transcript.as_str())
                .unwrap_or_default();
            Ok(transcript_hash(transcript) == record.transcript_hash)
        } else {
            Ok(false)
        }
    }
}

impl Default for InMemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionArchive for InMemoryArchive {
    async fn record(&self, record: DeliberationRecord) -> Result<Uuid> {
        let session_id = record.session_id;
        let mut records = self.records.write().await;
        records.insert(session_id, record);
        Ok(session_id)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<DeliberationRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&session_id).cloned())
    }

    /// All archived session ids, oldest first.
    async fn list(&self) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .iter()
            .map(|(id, record)| (*id, record.created_at))
            .collect();
        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }
}

/// SHA-256 of a transcript, hex-encoded.
pub fn transcript_hash(transcript: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transcript.as_bytes());
    hex::encode(hasher.finalize())
}

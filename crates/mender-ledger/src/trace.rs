//! Hash-chained trace log
//!
//! Each [`TraceRecord`] carries the SHA-256 of the previous record, so
//! [`TraceLog::verify_integrity`] detects edits, reordering and deletion.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};

const GENESIS: [u8; 32] = [0u8; 32];

/// Status of a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// Stage began
    Started,
    /// Stage finished
    Completed,
    /// Stage failed
    Failed,
    /// Informational note
    Info,
    /// Something suspicious but not fatal (e.g. a repeated version)
    Warning,
}

impl TraceStatus {
    /// Label
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }
}

impl Display for TraceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace event as emitted by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Stage name (`orchestrator`, `sandbox`, `rule_stage`, `error_interpreter`, ...)
    pub stage: String,
    /// Status
    pub status: TraceStatus,
    /// Free text
    pub message: String,
    /// Iteration the event belongs to
    pub iteration: Option<u32>,
    /// Stage duration
    pub duration_ms: Option<u64>,
}

impl TraceEvent {
    /// Create event
    #[inline]
    #[must_use]
    pub fn new(stage: impl Into<String>, status: TraceStatus, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status,
            message: message.into(),
            iteration: None,
            duration_ms: None,
        }
    }

    /// Set iteration
    #[inline]
    #[must_use]
    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Set duration
    #[inline]
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Appended, chained trace record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Position in the log, from 0
    pub sequence: u64,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Event payload
    #[serde(flatten)]
    pub event: TraceEvent,
    /// Hex SHA-256 of the previous record (zeros for the first)
    pub prev_hash: String,
    /// Hex SHA-256 of this record
    pub hash: String,
}

/// Append-only trace log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceLog {
    records: Vec<TraceRecord>,
}

impl TraceLog {
    /// Create empty log
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return the chained record
    pub fn append(&mut self, event: TraceEvent) -> &TraceRecord {
        let prev = self
            .records
            .last()
            .and_then(|r| decode(&r.hash))
            .unwrap_or(GENESIS);
        let sequence = self.records.len() as u64;
        let timestamp = Utc::now();
        let hash = compute_hash(sequence, &timestamp, &event, &prev);
        let index = self.records.len();
        self.records.push(TraceRecord {
            sequence,
            timestamp,
            event,
            prev_hash: hex::encode(prev),
            hash: hex::encode(hash),
        });
        &self.records[index]
    }

    /// All records
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Latest record
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&TraceRecord> {
        self.records.last()
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Verify the chain
    ///
    /// # Errors
    /// `LedgerError::TraceIntegrity` with the first bad sequence number
    pub fn verify_integrity(&self) -> Result<(), LedgerError> {
        verify_records(&self.records)
    }
}

/// Verify an exported slice of records
///
/// # Errors
/// `LedgerError::TraceIntegrity` with the first bad sequence number
pub fn verify_records(records: &[TraceRecord]) -> Result<(), LedgerError> {
    let mut prev = GENESIS;
    for (idx, record) in records.iter().enumerate() {
        let expected_seq = idx as u64;
        if record.sequence != expected_seq || decode(&record.prev_hash) != Some(prev) {
            return Err(LedgerError::TraceIntegrity(expected_seq));
        }
        let hash = compute_hash(record.sequence, &record.timestamp, &record.event, &prev);
        if decode(&record.hash) != Some(hash) {
            return Err(LedgerError::TraceIntegrity(expected_seq));
        }
        prev = hash;
    }
    Ok(())
}

fn decode(hex_hash: &str) -> Option<[u8; 32]> {
    hex::decode(hex_hash).ok()?.try_into().ok()
}

fn compute_hash(sequence: u64, timestamp: &DateTime<Utc>, event: &TraceEvent, prev: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(event.stage.as_bytes());
    hasher.update([0]);
    hasher.update(event.status.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event.message.as_bytes());
    hasher.update([0]);
    hasher.update(event.iteration.map_or(u64::MAX, u64::from).to_le_bytes());
    hasher.update(event.duration_ms.unwrap_or(u64::MAX).to_le_bytes());
    hasher.update(prev);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> TraceLog {
        let mut log = TraceLog::new();
        log.append(TraceEvent::new("orchestrator", TraceStatus::Started, "session started"));
        log.append(
            TraceEvent::new("sandbox", TraceStatus::Completed, "error")
                .with_iteration(0)
                .with_duration_ms(12),
        );
        log.append(TraceEvent::new("rule_stage", TraceStatus::Completed, "no match").with_iteration(0));
        log
    }

    #[test]
    fn test_chain_links_records() {
        let log = sample_log();
        assert_eq!(log.len(), 3);
        let records = log.records();
        assert_eq!(records[0].prev_hash, hex::encode(GENESIS));
        assert_eq!(records[1].prev_hash, records[0].hash);
        assert_eq!(records[2].sequence, 2);
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut records = sample_log().records().to_vec();
        records[1].event.message = "success".to_string();
        assert_eq!(verify_records(&records), Err(LedgerError::TraceIntegrity(1)));
    }

    #[test]
    fn test_deletion_is_detected() {
        let mut records = sample_log().records().to_vec();
        records.remove(1);
        assert_eq!(verify_records(&records), Err(LedgerError::TraceIntegrity(1)));
    }

    #[test]
    fn test_serde_round_trip_keeps_chain_valid() {
        let log = sample_log();
        let json = serde_json::to_string(&log).unwrap();
        let back: TraceLog = serde_json::from_str(&json).unwrap();
        assert!(back.verify_integrity().is_ok());
        assert_eq!(back, log);
    }
}

//! Append-only audit log of event submissions.
//!
//! Every submission the engine sees ends up here, accepted or rejected.
//! Records are never modified or removed; indices are dense and start at 0.

use chrono::{DateTime, Utc};
use fidelis_identity::EntityId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::tensor::ContextId;

/// Why a submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    /// A signature did not verify.
    InvalidSignature,
    /// Sequence not above the last accepted one.
    ReplayedSequence,
    /// Witness set failed the diversity policy.
    InsufficientWitnessDiversity,
    /// A witness is under-bonded.
    InsufficientStake,
    /// Subject revoked.
    EntityRevoked,
    /// Subject permanently flagged.
    EntityFlagged,
    /// Subject not registered.
    UnknownEntity,
    /// Event structure invalid.
    MalformedEvent,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidSignature => "invalid_signature",
            Self::ReplayedSequence => "replayed_sequence",
            Self::InsufficientWitnessDiversity => "insufficient_witness_diversity",
            Self::InsufficientStake => "insufficient_stake",
            Self::EntityRevoked => "entity_revoked",
            Self::EntityFlagged => "entity_flagged",
            Self::UnknownEntity => "unknown_entity",
            Self::MalformedEvent => "malformed_event",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditOutcome {
    /// Applied to the subject's tensor.
    Accepted {
        /// Aggregate before the event.
        aggregate_before: f64,
        /// Aggregate after the event.
        aggregate_after: f64,
        /// Whether the delta was flagged suspect.
        suspect: bool,
    },
    /// Refused without mutation.
    Rejected {
        /// Rejection class.
        reason: ReasonCode,
        /// Error text.
        detail: String,
    },
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the log.
    pub index: u64,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
    /// Event subject.
    pub subject: EntityId,
    /// Event context.
    pub context: ContextId,
    /// Event sequence.
    pub sequence: u64,
    /// Result.
    pub outcome: AuditOutcome,
}

impl AuditRecord {
    /// Whether the submission was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Accepted { .. })
    }
}

/// Thread-safe append-only log.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its index.
    pub fn record(
        &self,
        subject: EntityId,
        context: ContextId,
        sequence: u64,
        outcome: AuditOutcome,
        at: DateTime<Utc>,
    ) -> u64 {
        let mut records = self.records.lock();
        let index = records.len() as u64;
        records.push(AuditRecord {
            index,
            recorded_at: at,
            subject,
            context,
            sequence,
            outcome,
        });
        index
    }

    /// All records, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Records with index `>= from`.
    #[must_use]
    pub fn since(&self, from: u64) -> Vec<AuditRecord> {
        let records = self.records.lock();
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(records.len());
        records[start..].to_vec()
    }

    /// Records for one subject.
    #[must_use]
    pub fn for_subject(&self, subject: &EntityId) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| &r.subject == subject)
            .cloned()
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of rejected submissions.
    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.records.lock().iter().filter(|r| !r.is_accepted()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_identity::EntityKeyPair;

    #[test]
    fn test_indices_are_dense() {
        let log = AuditLog::new();
        let subject = EntityKeyPair::from_seed(&[1; 32]).id();
        let ctx = ContextId::new("ctx").unwrap();
        let now = Utc::now();

        let a = log.record(
            subject,
            ctx.clone(),
            1,
            AuditOutcome::Accepted { aggregate_before: 0.5, aggregate_after: 0.51, suspect: false },
            now,
        );
        let b = log.record(
            subject,
            ctx,
            1,
            AuditOutcome::Rejected { reason: ReasonCode::ReplayedSequence, detail: "replay".into() },
            now,
        );
        assert_eq!((a, b), (0, 1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.rejected_count(), 1);
        assert_eq!(log.since(1).len(), 1);
        assert!(log.since(99).is_empty());
        assert_eq!(log.for_subject(&subject).len(), 2);
    }

    #[test]
    fn test_reason_code_display() {
        assert_eq!(ReasonCode::InsufficientStake.to_string(), "insufficient_stake");
    }
}

//! Error taxonomy for the identity resolution and merge engine.
//!
//! The split matters operationally: `SameIdentity`, `InvalidInput`,
//! `NotFound` and `Conflict` mean nothing was written and the request can be
//! retried or abandoned freely; `PartialFailure` means some dependent tables
//! were already transferred and the same call must be reissued to completion.

use thiserror::Error;

use crate::model::{DependentTable, PatientId, TenantId};

/// Failure at the record-store seam.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Failure acquiring the per-identity advisory locks that serialize merges.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock contention on patient {patient_id}")]
    Contention { patient_id: PatientId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Engine-level error surfaced to the operator-facing API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("keep and remove must be different identities")]
    SameIdentity,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("patient {patient_id} not found in tenant {tenant_id} (or already merged away)")]
    NotFound {
        tenant_id: TenantId,
        patient_id: PatientId,
    },

    #[error("another merge touching patient {patient_id} is in flight; try again shortly")]
    Conflict { patient_id: PatientId },

    #[error(
        "merge partially applied: step {resume_point} of {total} ({table}) failed; \
         reissue the identical merge call to complete it"
    )]
    PartialFailure {
        resume_point: usize,
        total: usize,
        table: DependentTable,
        #[source]
        source: StoreError,
    },

    #[error("record store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl EngineError {
    /// True when nothing was written: safe to retry or abandon without
    /// further thought. `PartialFailure` is deliberately excluded — the
    /// remove identity must not be treated as intact after one.
    pub fn is_side_effect_free(&self) -> bool {
        !matches!(self, EngineError::PartialFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_is_not_side_effect_free() {
        let err = EngineError::PartialFailure {
            resume_point: 3,
            total: 12,
            table: DependentTable::MessageLog,
            source: StoreError::Unavailable("connection reset".into()),
        };
        assert!(!err.is_side_effect_free());
        assert!(err.to_string().contains("step 3 of 12"));
        assert!(err.to_string().contains("message_log"));
    }

    #[test]
    fn test_conflict_is_side_effect_free() {
        assert!(EngineError::Conflict { patient_id: 9 }.is_side_effect_free());
        assert!(EngineError::SameIdentity.is_side_effect_free());
    }
}

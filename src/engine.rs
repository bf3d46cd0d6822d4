//! Engine facade: the three operator-facing operations.
//!
//! HTTP handlers (out of scope here) construct one `MergeEngine` per
//! process and call `detect_candidates`, `ignore_pair` and `merge` with the
//! tenant id supplied by the already-authorized tenant resolver.

use std::sync::Arc;

use tracing::info;

use crate::detect::CandidateDetector;
use crate::error::EngineError;
use crate::merge::MergeExecutor;
use crate::model::{DuplicateCandidate, IdPair, MergeDetails, PatientId, TenantId};
use crate::store::{AuditSink, CacheInvalidator, RecordStore};

pub struct MergeEngine {
    store: Arc<dyn RecordStore>,
    detector: CandidateDetector,
    executor: MergeExecutor,
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            detector: CandidateDetector::new(store.clone()),
            executor: MergeExecutor::new(store.clone(), audit, cache),
            store,
        }
    }

    /// Ranked duplicate candidates for a tenant, highest confidence first.
    pub async fn detect_candidates(
        &self,
        tenant_id: TenantId,
        min_score: u8,
    ) -> Result<Vec<DuplicateCandidate>, EngineError> {
        self.detector.detect_candidates(tenant_id, min_score).await
    }

    /// Record an operator decision that (a, b) is not a duplicate pair.
    /// Idempotent; the pair stops appearing in detection output in either
    /// order.
    pub async fn ignore_pair(
        &self,
        tenant_id: TenantId,
        id_a: PatientId,
        id_b: PatientId,
    ) -> Result<(), EngineError> {
        if id_a == id_b {
            return Err(EngineError::SameIdentity);
        }
        for id in [id_a, id_b] {
            if self.store.get_identity(tenant_id, id).await?.is_none() {
                return Err(EngineError::NotFound {
                    tenant_id,
                    patient_id: id,
                });
            }
        }

        let pair = IdPair::new(id_a, id_b);
        self.store.record_ignore(tenant_id, pair).await?;
        info!(%tenant_id, low = pair.low(), high = pair.high(), "pair marked not-a-duplicate");
        Ok(())
    }

    /// Consolidate `remove_id` into `keep_id`. See `MergeExecutor::merge`
    /// for the failure contract.
    pub async fn merge(
        &self,
        tenant_id: TenantId,
        keep_id: PatientId,
        remove_id: PatientId,
        actor: &str,
    ) -> Result<MergeDetails, EngineError> {
        self.executor.merge(tenant_id, keep_id, remove_id, actor).await
    }
}

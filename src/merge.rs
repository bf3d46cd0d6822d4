//! Merge executor: the consolidation state machine.
//!
//! One attempt runs `Validating → Transferring(i of N) → Finalizing →
//! Completed`. Every per-table transfer is idempotent, so a `Failed(i)`
//! attempt is completed by reissuing the identical call. The remove-side
//! identity row is deleted strictly after every dependent table has been
//! transferred — the core correctness invariant: no dependent row may ever
//! reference a deleted identity.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, LockError, StoreError};
use crate::model::{
    DependentTable, IdPair, MergeAuditRecord, MergeDetails, MergeOutcome, PatientId, TableTransfer,
    TenantId,
};
use crate::store::{AuditSink, CacheInvalidator, LockLease, RecordStore};

pub struct MergeExecutor {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    cache: Arc<dyn CacheInvalidator>,
}

impl MergeExecutor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            store,
            audit,
            cache,
        }
    }

    /// Consolidate `remove_id` into `keep_id` within one tenant.
    ///
    /// Rejections (`SameIdentity`, `NotFound`, `Conflict`) happen before any
    /// write. `PartialFailure` means some tables were transferred; the same
    /// call must be reissued to completion and the remove identity must not
    /// be treated as intact in the meantime.
    pub async fn merge(
        &self,
        tenant_id: TenantId,
        keep_id: PatientId,
        remove_id: PatientId,
        actor: &str,
    ) -> Result<MergeDetails, EngineError> {
        if keep_id == remove_id {
            return Err(EngineError::SameIdentity);
        }

        let pair = IdPair::new(keep_id, remove_id);
        let lease = match self.store.try_lock_pair(tenant_id, pair).await {
            Ok(lease) => lease,
            Err(LockError::Contention { patient_id }) => {
                // Another merge touching one of the ids is in flight. Worth
                // an audit trail entry: repeated conflicts on the same pair
                // are an operational signal.
                self.append_audit(
                    tenant_id,
                    keep_id,
                    remove_id,
                    actor,
                    MergeOutcome::Rejected {
                        reason: format!("lock contention on patient {patient_id}"),
                    },
                    Vec::new(),
                )
                .await;
                return Err(EngineError::Conflict { patient_id });
            }
            Err(LockError::Store(e)) => return Err(EngineError::StoreUnavailable(e)),
        };

        // Existence is validated under the lock: a concurrent merge that
        // just removed one of the ids surfaces here as NotFound, not as a
        // half-written transfer.
        let result = self
            .validate_and_transfer(tenant_id, keep_id, remove_id, actor)
            .await;

        self.release(lease).await;

        if let Ok(details) = &result {
            // Derived views keyed by either id are stale now. Fire and
            // forget; the invalidator logs its own failures.
            self.cache.invalidate(tenant_id, keep_id).await;
            self.cache.invalidate(tenant_id, remove_id).await;
            info!(
                %tenant_id,
                keep_id,
                remove_id,
                transferred = details.total_transferred(),
                discarded = details.total_discarded(),
                "merge completed"
            );
        }

        result
    }

    async fn validate_and_transfer(
        &self,
        tenant_id: TenantId,
        keep_id: PatientId,
        remove_id: PatientId,
        actor: &str,
    ) -> Result<MergeDetails, EngineError> {
        for id in [keep_id, remove_id] {
            if self.store.get_identity(tenant_id, id).await?.is_none() {
                return Err(EngineError::NotFound {
                    tenant_id,
                    patient_id: id,
                });
            }
        }

        let total = DependentTable::ALL.len();
        let mut tables: Vec<TableTransfer> = Vec::with_capacity(total);

        for (step, table) in DependentTable::ALL.into_iter().enumerate() {
            match self
                .store
                .transfer_references(tenant_id, table, remove_id, keep_id)
                .await
            {
                Ok(counts) => tables.push(TableTransfer { table, counts }),
                Err(source) => {
                    warn!(
                        %tenant_id,
                        keep_id,
                        remove_id,
                        table = %table,
                        step,
                        error = %source,
                        "transfer step failed; merge left resumable"
                    );
                    self.append_audit(
                        tenant_id,
                        keep_id,
                        remove_id,
                        actor,
                        MergeOutcome::PartialFailure { resume_point: step },
                        tables,
                    )
                    .await;
                    return Err(EngineError::PartialFailure {
                        resume_point: step,
                        total,
                        table,
                        source,
                    });
                }
            }
        }

        // Finalizing: only now is it safe to retire the remove identity.
        if let Err(source) = self.store.delete_identity(tenant_id, remove_id).await {
            self.append_audit(
                tenant_id,
                keep_id,
                remove_id,
                actor,
                MergeOutcome::PartialFailure { resume_point: total },
                tables,
            )
            .await;
            return Err(EngineError::PartialFailure {
                resume_point: total,
                total,
                table: DependentTable::ALL[total - 1],
                source,
            });
        }

        self.append_audit(
            tenant_id,
            keep_id,
            remove_id,
            actor,
            MergeOutcome::Completed,
            tables.clone(),
        )
        .await;

        Ok(MergeDetails {
            tenant_id,
            kept_id: keep_id,
            removed_id: remove_id,
            tables,
        })
    }

    /// Audit append is best-effort: a sink outage must not fail (or roll
    /// back) an otherwise-successful merge. Surfaced as a warning for
    /// out-of-band retry.
    async fn append_audit(
        &self,
        tenant_id: TenantId,
        kept_id: PatientId,
        removed_id: PatientId,
        actor: &str,
        outcome: MergeOutcome,
        table_counts: Vec<TableTransfer>,
    ) {
        let record = MergeAuditRecord {
            id: Uuid::new_v4(),
            tenant_id,
            kept_id,
            removed_id,
            actor: actor.to_string(),
            outcome,
            table_counts,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.audit.append(record).await {
            warn!(
                %tenant_id,
                kept_id,
                removed_id,
                error = %e,
                "audit append failed; record must be retried out-of-band"
            );
        }
    }

    async fn release(&self, lease: LockLease) {
        if let Err(e) = self.store.unlock(lease).await {
            warn!(error = %e, "failed to release merge locks");
        }
    }
}

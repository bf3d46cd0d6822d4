//! Persistence seams consumed by the engine.
//!
//! The engine never talks to a datastore directly; it goes through the
//! `RecordStore`, `AuditSink` and `CacheInvalidator` traits. The in-memory
//! implementation backs tests and the no-database mode; the Postgres
//! implementation (behind the `database` feature) is the production path.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{LockError, StoreError};
use crate::model::{
    DependentTable, IdPair, MergeAuditRecord, PatientId, PatientIdentity, TenantId, TransferCounts,
};

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

/// Proof that the per-identity advisory locks for one merge attempt are
/// held. Returned by `try_lock_pair`, consumed by `unlock`. The merge
/// executor releases it on every exit path.
pub struct LockLease {
    pub(crate) inner: LeaseInner,
}

pub(crate) enum LeaseInner {
    Memory {
        tenant_id: TenantId,
        ids: Vec<PatientId>,
    },
    #[cfg(feature = "database")]
    Postgres {
        conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
        keys: Vec<i64>,
    },
}

/// Tenant-scoped record store: identity reads, dependent-table transfers,
/// the ignore list, and the advisory locks that serialize merges.
///
/// Every method is scoped by tenant id; implementations must never let a
/// read or write cross tenants.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_identities(&self, tenant_id: TenantId)
        -> Result<Vec<PatientIdentity>, StoreError>;

    async fn get_identity(
        &self,
        tenant_id: TenantId,
        id: PatientId,
    ) -> Result<Option<PatientIdentity>, StoreError>;

    /// Rows in `table` currently referencing `id`.
    async fn count_references(
        &self,
        tenant_id: TenantId,
        table: DependentTable,
        id: PatientId,
    ) -> Result<u64, StoreError>;

    /// Re-point every row in `table` referencing `from` to reference `to`.
    ///
    /// Idempotent: once no rows reference `from`, re-running is a no-op with
    /// zero counts. For tables with a patient-keyed uniqueness constraint,
    /// the keep side's existing row wins and the colliding `from` row is
    /// dropped and counted as discarded.
    async fn transfer_references(
        &self,
        tenant_id: TenantId,
        table: DependentTable,
        from: PatientId,
        to: PatientId,
    ) -> Result<TransferCounts, StoreError>;

    /// Delete the identity row itself. Terminal merge step only.
    async fn delete_identity(&self, tenant_id: TenantId, id: PatientId) -> Result<(), StoreError>;

    /// Idempotent insert of an ignored pair: recording the same pair twice
    /// must not error or duplicate.
    async fn record_ignore(&self, tenant_id: TenantId, pair: IdPair) -> Result<(), StoreError>;

    async fn is_ignored(&self, tenant_id: TenantId, pair: IdPair) -> Result<bool, StoreError>;

    async fn ignored_pairs(&self, tenant_id: TenantId) -> Result<HashSet<IdPair>, StoreError>;

    /// Acquire exclusive advisory locks on both identities of `pair`,
    /// fail-fast. Lock keys are taken in ascending order so two merges
    /// touching overlapping identities cannot deadlock.
    async fn try_lock_pair(
        &self,
        tenant_id: TenantId,
        pair: IdPair,
    ) -> Result<LockLease, LockError>;

    /// Release the locks behind `lease`. Must be called on every merge exit
    /// path — success, validation failure, or transfer failure.
    async fn unlock(&self, lease: LockLease) -> Result<(), StoreError>;
}

/// Append-only audit sink. Failure to append never rolls back a merge; the
/// executor logs it and moves on.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: MergeAuditRecord) -> Result<(), StoreError>;

    /// Most recent merge records for a tenant, newest first. Compliance
    /// review helper.
    async fn recent_merges(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<MergeAuditRecord>, StoreError>;
}

/// Fire-and-forget invalidation of cached derived views keyed by patient id
/// (dashboard aggregates, segment counts). Failures are logged by the
/// implementation, never propagated.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, tenant_id: TenantId, patient_id: PatientId);
}

/// Default invalidator for deployments without a derived-view cache.
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate(&self, tenant_id: TenantId, patient_id: PatientId) {
        debug!(%tenant_id, patient_id, "no cache configured; invalidation skipped");
    }
}

//! In-memory record store and audit sink.
//!
//! Backs the test suite and the no-database mode: same contract as the
//! Postgres store, including the keep-wins collision policy and fail-fast
//! pair locking. Carries a fault-injection hook so resumability can be
//! exercised without a real outage.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{LockError, StoreError};
use crate::model::{
    DependentTable, IdPair, MergeAuditRecord, PatientId, PatientIdentity, TenantId, TransferCounts,
};
use crate::store::{AuditSink, LeaseInner, LockLease, RecordStore};

/// One dependent-table row: the patient reference plus the non-patient part
/// of the table's uniqueness key, when the table has one.
#[derive(Debug, Clone)]
struct Row {
    patient_id: PatientId,
    unique_key: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    identities: HashMap<(TenantId, PatientId), PatientIdentity>,
    rows: HashMap<(TenantId, DependentTable), Vec<Row>>,
    ignored: HashMap<TenantId, HashSet<IdPair>>,
    locked: HashSet<(TenantId, PatientId)>,
    /// Remaining successful transfer calls before one injected failure.
    fail_after: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_identity(&self, identity: PatientIdentity) {
        let mut state = self.state.lock().await;
        state
            .identities
            .insert((identity.tenant_id, identity.id), identity);
    }

    /// Seed one dependent-table row. `unique_key` is the non-patient part of
    /// the uniqueness key for tables that have one (e.g. the tag id for
    /// `tag_assignments`); ignored for plain tables and for one-row-per-patient
    /// tables.
    pub async fn insert_row(
        &self,
        tenant_id: TenantId,
        table: DependentTable,
        patient_id: PatientId,
        unique_key: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        state.rows.entry((tenant_id, table)).or_default().push(Row {
            patient_id,
            unique_key: unique_key.map(String::from),
        });
    }

    /// Arm the fault injector: the next `n` transfer calls succeed, the one
    /// after fails once with `StoreError::Unavailable`, then the injector
    /// disarms so a retry runs clean.
    pub async fn fail_after_tables(&self, n: usize) {
        self.state.lock().await.fail_after = Some(n);
    }

    /// Whether any lock is currently held (leak check for tests).
    pub async fn held_locks(&self) -> usize {
        self.state.lock().await.locked.len()
    }
}

/// For one-row-per-patient tables the whole key is the patient id, so every
/// remove-side row collides with any keep-side row.
fn effective_key(table: DependentTable, row: &Row) -> Option<String> {
    match table.unique_key_columns() {
        Some(cols) if cols.is_empty() => None,
        _ => row.unique_key.clone(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_identities(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<PatientIdentity>, StoreError> {
        let state = self.state.lock().await;
        let mut identities: Vec<PatientIdentity> = state
            .identities
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        identities.sort_by_key(|i| i.id);
        Ok(identities)
    }

    async fn get_identity(
        &self,
        tenant_id: TenantId,
        id: PatientId,
    ) -> Result<Option<PatientIdentity>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.identities.get(&(tenant_id, id)).cloned())
    }

    async fn count_references(
        &self,
        tenant_id: TenantId,
        table: DependentTable,
        id: PatientId,
    ) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .get(&(tenant_id, table))
            .map(|rows| rows.iter().filter(|r| r.patient_id == id).count() as u64)
            .unwrap_or(0))
    }

    async fn transfer_references(
        &self,
        tenant_id: TenantId,
        table: DependentTable,
        from: PatientId,
        to: PatientId,
    ) -> Result<TransferCounts, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(remaining) = state.fail_after {
            if remaining == 0 {
                state.fail_after = None;
                return Err(StoreError::Unavailable(
                    "injected transfer fault".to_string(),
                ));
            }
            state.fail_after = Some(remaining - 1);
        }

        let mut counts = TransferCounts::default();
        let rows = match state.rows.get_mut(&(tenant_id, table)) {
            Some(rows) => rows,
            None => return Ok(counts),
        };

        if table.unique_key_columns().is_some() {
            let keep_keys: HashSet<Option<String>> = rows
                .iter()
                .filter(|r| r.patient_id == to)
                .map(|r| effective_key(table, r))
                .collect();

            let mut surviving = Vec::with_capacity(rows.len());
            for mut row in rows.drain(..) {
                if row.patient_id == from {
                    if keep_keys.contains(&effective_key(table, &row)) {
                        counts.discarded += 1;
                        continue;
                    }
                    row.patient_id = to;
                    counts.transferred += 1;
                }
                surviving.push(row);
            }
            *rows = surviving;
        } else {
            for row in rows.iter_mut() {
                if row.patient_id == from {
                    row.patient_id = to;
                    counts.transferred += 1;
                }
            }
        }

        Ok(counts)
    }

    async fn delete_identity(&self, tenant_id: TenantId, id: PatientId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.identities.remove(&(tenant_id, id));
        Ok(())
    }

    async fn record_ignore(&self, tenant_id: TenantId, pair: IdPair) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ignored.entry(tenant_id).or_default().insert(pair);
        Ok(())
    }

    async fn is_ignored(&self, tenant_id: TenantId, pair: IdPair) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ignored
            .get(&tenant_id)
            .map(|set| set.contains(&pair))
            .unwrap_or(false))
    }

    async fn ignored_pairs(&self, tenant_id: TenantId) -> Result<HashSet<IdPair>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ignored.get(&tenant_id).cloned().unwrap_or_default())
    }

    async fn try_lock_pair(
        &self,
        tenant_id: TenantId,
        pair: IdPair,
    ) -> Result<LockLease, LockError> {
        let mut state = self.state.lock().await;

        // Fail-fast before taking anything: either id already locked means
        // another merge touching it is in flight.
        for id in [pair.low(), pair.high()] {
            if state.locked.contains(&(tenant_id, id)) {
                return Err(LockError::Contention { patient_id: id });
            }
        }
        state.locked.insert((tenant_id, pair.low()));
        state.locked.insert((tenant_id, pair.high()));

        Ok(LockLease {
            inner: LeaseInner::Memory {
                tenant_id,
                ids: vec![pair.low(), pair.high()],
            },
        })
    }

    async fn unlock(&self, lease: LockLease) -> Result<(), StoreError> {
        match lease.inner {
            LeaseInner::Memory { tenant_id, ids } => {
                let mut state = self.state.lock().await;
                for id in ids {
                    state.locked.remove(&(tenant_id, id));
                }
                Ok(())
            }
            #[cfg(feature = "database")]
            LeaseInner::Postgres { .. } => Err(StoreError::Unavailable(
                "postgres lease handed to memory store".to_string(),
            )),
        }
    }
}

/// In-memory append-only audit sink.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<MergeAuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_records(&self) -> Vec<MergeAuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: MergeAuditRecord) -> Result<(), StoreError> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn recent_merges(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<MergeAuditRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

//! Patient identity resolution and merge engine.
//!
//! Detects likely-duplicate patient records within a tenant, records
//! operator decisions that a pair is not a duplicate, and atomically
//! consolidates two records into one — re-pointing every dependent record
//! from the discarded identity to the survivor, with an append-only audit
//! trail.
//!
//! ## Pipeline
//! Normalize fields -> blocking index -> similarity scoring -> ranked
//! candidates -> operator review (external) -> ignore or merge.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use patient_identity_engine::engine::MergeEngine;
//! use patient_identity_engine::store::memory::{MemoryAuditSink, MemoryStore};
//! use patient_identity_engine::store::NoopCacheInvalidator;
//!
//! # async fn run() {
//! let store = Arc::new(MemoryStore::new());
//! let engine = MergeEngine::new(
//!     store,
//!     Arc::new(MemoryAuditSink::new()),
//!     Arc::new(NoopCacheInvalidator),
//! );
//! let tenant = uuid::Uuid::new_v4();
//! let candidates = engine.detect_candidates(tenant, 30).await.unwrap();
//! # }
//! ```

// Core error handling
pub mod error;

// Data model shared across the pipeline
pub mod model;

// Detection pipeline: normalize -> block -> score -> rank
pub mod blocking;
pub mod detect;
pub mod normalize;
pub mod scoring;

// Consolidation state machine
pub mod merge;

// Persistence seams (in-memory always; Postgres behind the `database` feature)
pub mod store;

// Operator-facing facade
pub mod engine;

pub use engine::MergeEngine;
pub use error::EngineError;
pub use model::{
    DependentTable, DuplicateCandidate, IdPair, MergeAuditRecord, MergeDetails, MergeOutcome,
    PatientId, PatientIdentity, TenantId,
};
pub use scoring::DEFAULT_MIN_SCORE;

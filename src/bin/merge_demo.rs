//! End-to-end demo against the in-memory store: seed a tenant with a LINE
//! shadow duplicate, detect, then merge the top candidate.
//!
//! Run with `RUST_LOG=debug cargo run --bin merge_demo` for pipeline logs.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use patient_identity_engine::model::{DependentTable, PatientIdentity};
use patient_identity_engine::store::memory::{MemoryAuditSink, MemoryStore};
use patient_identity_engine::store::NoopCacheInvalidator;
use patient_identity_engine::{MergeEngine, DEFAULT_MIN_SCORE};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let tenant = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(MemoryAuditSink::new());

    // A registered patient and the LINE shadow row created before they
    // completed registration.
    store
        .insert_identity(PatientIdentity {
            id: 1,
            tenant_id: tenant,
            display_name: "山田 太郎".to_string(),
            kana: Some("ヤマダ タロウ".to_string()),
            phone: Some("090-1111-2222".to_string()),
            birth_date: Some("1990-01-01".to_string()),
            line_shadow: false,
            created_at: Utc::now(),
            last_active_at: Utc::now(),
        })
        .await;
    store
        .insert_identity(PatientIdentity {
            id: 2,
            tenant_id: tenant,
            display_name: "やまだたろう".to_string(),
            kana: Some("ﾔﾏﾀﾞ ﾀﾛｳ".to_string()),
            phone: Some("09011112222".to_string()),
            birth_date: Some("1990/01/01".to_string()),
            line_shadow: true,
            created_at: Utc::now(),
            last_active_at: Utc::now(),
        })
        .await;
    store.insert_row(tenant, DependentTable::Reservations, 2, None).await;
    store.insert_row(tenant, DependentTable::MessageLog, 2, None).await;
    store.insert_row(tenant, DependentTable::MessageLog, 1, None).await;

    let engine = MergeEngine::new(store, audit.clone(), Arc::new(NoopCacheInvalidator));

    let candidates = engine.detect_candidates(tenant, DEFAULT_MIN_SCORE).await?;
    for c in &candidates {
        let reasons: Vec<String> = c.reasons.iter().map(|r| r.to_string()).collect();
        println!(
            "candidate {}..{} score {} [{}]",
            c.pair.low(),
            c.pair.high(),
            c.score,
            reasons.join(", ")
        );
    }

    if let Some(top) = candidates.first() {
        let details = engine
            .merge(tenant, top.pair.low(), top.pair.high(), "demo")
            .await?;
        println!(
            "merged {} into {}: {} rows transferred, {} discarded",
            details.removed_id,
            details.kept_id,
            details.total_transferred(),
            details.total_discarded()
        );
    }

    for record in audit.all_records().await {
        println!(
            "audit {} {:?} keep={} remove={}",
            record.id, record.outcome, record.kept_id, record.removed_id
        );
    }

    Ok(())
}

//! Candidate detector: blocking + scoring orchestration.
//!
//! Read-only and side-effect-free, so a failed detection is always safe to
//! retry as-is. No partial results: any store failure aborts the run.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::blocking::BlockingIndex;
use crate::error::EngineError;
use crate::model::{DuplicateCandidate, NormalizedIdentity, PatientId, TenantId};
use crate::scoring::score_pair;
use crate::store::RecordStore;

/// Cap on returned candidates per detection run. Operators review pages of
/// a few dozen; anything past this is noise until the top of the list is
/// worked down.
pub const MAX_CANDIDATES: usize = 200;

pub struct CandidateDetector {
    store: Arc<dyn RecordStore>,
}

impl CandidateDetector {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Produce the ranked, de-duplicated candidate list for one tenant,
    /// filtered by `min_score` and the ignore list.
    pub async fn detect_candidates(
        &self,
        tenant_id: TenantId,
        min_score: u8,
    ) -> Result<Vec<DuplicateCandidate>, EngineError> {
        let identities = self.store.list_identities(tenant_id).await?;
        let ignored = self.store.ignored_pairs(tenant_id).await?;

        // Normalize each identity once, not once per pair.
        let normalized: Vec<NormalizedIdentity> = identities
            .iter()
            .map(NormalizedIdentity::from_identity)
            .collect();
        let by_id: HashMap<PatientId, &NormalizedIdentity> =
            normalized.iter().map(|n| (n.id, n)).collect();

        let index = BlockingIndex::build(&normalized);
        let pairs = index.candidate_pairs();
        debug!(
            %tenant_id,
            identities = normalized.len(),
            blocks = index.block_count(),
            pairs = pairs.len(),
            "blocking index built"
        );

        let mut candidates = Vec::new();
        for pair in pairs {
            if ignored.contains(&pair) {
                continue;
            }
            let (Some(&a), Some(&b)) = (by_id.get(&pair.low()), by_id.get(&pair.high())) else {
                continue;
            };
            let result = score_pair(a, b);
            if result.score < min_score {
                continue;
            }
            candidates.push(DuplicateCandidate {
                pair,
                score: result.score,
                reasons: result.reasons,
                last_active_at: a.last_active_at.max(b.last_active_at),
            });
        }

        // Descending score, then most recently active first, then the
        // combined id string for a deterministic total order.
        candidates.sort_by(|x, y| {
            y.score
                .cmp(&x.score)
                .then(y.last_active_at.cmp(&x.last_active_at))
                .then_with(|| x.pair.combined_key().cmp(&y.pair.combined_key()))
        });
        candidates.truncate(MAX_CANDIDATES);

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdPair, MatchReason, PatientIdentity};
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn identity(
        tenant_id: TenantId,
        id: PatientId,
        phone: Option<&str>,
        kana: Option<&str>,
        birth: Option<&str>,
    ) -> PatientIdentity {
        PatientIdentity {
            id,
            tenant_id,
            display_name: format!("patient {id}"),
            kana: kana.map(String::from),
            phone: phone.map(String::from),
            birth_date: birth.map(String::from),
            line_shadow: false,
            created_at: Utc::now(),
            last_active_at: Utc::now() + Duration::seconds(id),
        }
    }

    async fn seeded_detector(identities: Vec<PatientIdentity>) -> (Arc<MemoryStore>, CandidateDetector) {
        let store = Arc::new(MemoryStore::new());
        for i in identities {
            store.insert_identity(i).await;
        }
        let detector = CandidateDetector::new(store.clone());
        (store, detector)
    }

    #[tokio::test]
    async fn test_detects_the_reference_pair() {
        let tenant = Uuid::new_v4();
        let (_, detector) = seeded_detector(vec![
            identity(tenant, 1, Some("090-1111-2222"), Some("ヤマダ タロウ"), Some("1990-01-01")),
            identity(tenant, 2, Some("09011112222"), Some("ヤマダ タロウ"), Some("1990-01-01")),
            identity(tenant, 3, Some("080-9999-8888"), Some("スズキ ハナコ"), Some("1985-06-15")),
        ])
        .await;

        let candidates = detector.detect_candidates(tenant, 0).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pair, IdPair::new(1, 2));
        assert!(candidates[0].score >= 95);
        assert_eq!(
            candidates[0].reasons,
            vec![
                MatchReason::ExactPhone,
                MatchReason::PhoneticName,
                MatchReason::BirthDate
            ]
        );
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let tenant = Uuid::new_v4();
        // Same birth date only: score 20.
        let (_, detector) = seeded_detector(vec![
            identity(tenant, 1, None, Some("ヤマダ タロウ"), Some("1990-01-01")),
            identity(tenant, 2, None, Some("サトウ ケンジ"), Some("1990-01-01")),
        ])
        .await;

        assert!(detector.detect_candidates(tenant, 30).await.unwrap().is_empty());
        assert_eq!(detector.detect_candidates(tenant, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ignored_pair_suppressed_in_both_orders() {
        let tenant = Uuid::new_v4();
        let (store, detector) = seeded_detector(vec![
            identity(tenant, 1, Some("09011112222"), None, None),
            identity(tenant, 2, Some("09011112222"), None, None),
        ])
        .await;

        assert_eq!(detector.detect_candidates(tenant, 0).await.unwrap().len(), 1);

        // Recorded as (2,1); canonical form suppresses (1,2) as well.
        store.record_ignore(tenant, IdPair::new(2, 1)).await.unwrap();
        assert!(detector.detect_candidates(tenant, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic() {
        let tenant = Uuid::new_v4();
        let (_, detector) = seeded_detector(vec![
            // High-confidence pair (1,2), weaker pair (3,4).
            identity(tenant, 1, Some("09011112222"), Some("ヤマダ タロウ"), Some("1990-01-01")),
            identity(tenant, 2, Some("09011112222"), Some("ヤマダ タロウ"), Some("1990-01-01")),
            identity(tenant, 3, Some("08033334444"), Some("サトウ ユミ"), None),
            identity(tenant, 4, Some("08033334444"), Some("タナカ イチロウ"), None),
        ])
        .await;

        let first = detector.detect_candidates(tenant, 0).await.unwrap();
        let second = detector.detect_candidates(tenant, 0).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].pair, IdPair::new(1, 2));
        assert_eq!(first[1].pair, IdPair::new(3, 4));
        assert!(first[0].score > first[1].score);

        let order_a: Vec<_> = first.iter().map(|c| c.pair).collect();
        let order_b: Vec<_> = second.iter().map(|c| c.pair).collect();
        assert_eq!(order_a, order_b);
    }

    #[tokio::test]
    async fn test_tenants_do_not_cross() {
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let (_, detector) = seeded_detector(vec![
            identity(tenant_a, 1, Some("09011112222"), None, None),
            identity(tenant_b, 2, Some("09011112222"), None, None),
        ])
        .await;

        assert!(detector.detect_candidates(tenant_a, 0).await.unwrap().is_empty());
        assert!(detector.detect_candidates(tenant_b, 0).await.unwrap().is_empty());
    }
}

//! Similarity scorer: weighted signal sum over normalized identity fields.
//!
//! Each signal is computed independently and only contributes when both
//! sides are comparable — a missing field never counts against a pair.
//! The contributing signals are reported by name so operators can see *why*
//! a pair was surfaced, and so audit annotations stay explainable.

use crate::model::{MatchReason, NormalizedIdentity};

/// Exact phone match weight.
const WEIGHT_PHONE: f64 = 40.0;

/// Maximum phonetic-name weight, scaled down by relative edit distance.
const WEIGHT_KANA: f64 = 35.0;

/// Birth date exact match weight.
const WEIGHT_BIRTH_DATE: f64 = 20.0;

/// Display-name fallback weight. Deliberately below `DEFAULT_MIN_SCORE` so a
/// display-name match alone can never surface a candidate.
const WEIGHT_DISPLAY_NAME: f64 = 15.0;

/// Edit distance relative to max length above which names do not match.
const EDIT_RATIO_MAX: f64 = 0.34;

/// Default minimum confidence for surfacing a candidate.
pub const DEFAULT_MIN_SCORE: u8 = 30;

/// Confidence score and contributing signals for one candidate pair.
#[derive(Debug, Clone)]
pub struct MatchScore {
    /// 0..=100, clamped.
    pub score: u8,
    pub reasons: Vec<MatchReason>,
}

/// Levenshtein distance normalized by the longer input, `None` when either
/// side is empty (non-comparable).
fn edit_ratio(a: &str, b: &str) -> Option<f64> {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return None;
    }
    Some(strsim::levenshtein(a, b) as f64 / max_len as f64)
}

/// Score a candidate pair. Symmetric: `score_pair(a, b) == score_pair(b, a)`.
pub fn score_pair(a: &NormalizedIdentity, b: &NormalizedIdentity) -> MatchScore {
    let mut total = 0.0;
    let mut reasons = Vec::new();

    if let (Some(pa), Some(pb)) = (&a.phone, &b.phone) {
        if pa == pb {
            total += WEIGHT_PHONE;
            reasons.push(MatchReason::ExactPhone);
        }
    }

    let mut kana_comparable = false;
    if let (Some(ka), Some(kb)) = (&a.kana, &b.kana) {
        if let Some(ratio) = edit_ratio(ka, kb) {
            kana_comparable = true;
            if ratio <= EDIT_RATIO_MAX {
                total += WEIGHT_KANA * (1.0 - ratio);
                reasons.push(MatchReason::PhoneticName);
            }
        }
    }

    if let (Some(da), Some(db)) = (a.birth_date, b.birth_date) {
        if da == db {
            total += WEIGHT_BIRTH_DATE;
            reasons.push(MatchReason::BirthDate);
        }
    }

    // Display-name fallback only when the phonetic reading could not be
    // compared; kana is the stronger signal for the same underlying fact.
    if !kana_comparable {
        if let (Some(na), Some(nb)) = (&a.name, &b.name) {
            if na.contains(nb.as_str()) || nb.contains(na.as_str()) {
                total += WEIGHT_DISPLAY_NAME;
                reasons.push(MatchReason::DisplayName);
            } else if let Some(ratio) = edit_ratio(na, nb) {
                if ratio <= EDIT_RATIO_MAX {
                    total += WEIGHT_DISPLAY_NAME * (1.0 - ratio);
                    reasons.push(MatchReason::DisplayName);
                }
            }
        }
    }

    MatchScore {
        score: total.round().clamp(0.0, 100.0) as u8,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;

    fn norm(
        id: i64,
        name: Option<&str>,
        kana: Option<&str>,
        phone: Option<&str>,
        birth: Option<&str>,
    ) -> NormalizedIdentity {
        NormalizedIdentity {
            id,
            name: name.map(String::from),
            kana: kana.map(String::from),
            phone: phone.map(String::from),
            birth_date: birth.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            last_active_at: Utc::now(),
        }
    }

    #[test]
    fn test_reference_scenario_scores_at_least_95() {
        // The canonical spec pair: same phone (after normalization), same
        // kana, same birth date.
        let a = norm(1, None, Some("ヤマダ タロウ"), Some("09011112222"), Some("1990-01-01"));
        let b = norm(2, None, Some("ヤマダ タロウ"), Some("09011112222"), Some("1990-01-01"));

        let result = score_pair(&a, &b);
        assert!(result.score >= 95, "score was {}", result.score);
        assert_eq!(
            result.reasons,
            vec![
                MatchReason::ExactPhone,
                MatchReason::PhoneticName,
                MatchReason::BirthDate
            ]
        );
        let rendered: Vec<String> = result.reasons.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["exact phone match", "phonetic name match", "birth date match"]
        );
    }

    #[test]
    fn test_missing_fields_are_non_comparable_not_mismatch() {
        let a = norm(1, None, None, Some("09011112222"), None);
        let b = norm(2, None, Some("ヤマダ タロウ"), Some("09011112222"), Some("1990-01-01"));

        let result = score_pair(&a, &b);
        assert_eq!(result.score, 40);
        assert_eq!(result.reasons, vec![MatchReason::ExactPhone]);
    }

    #[test]
    fn test_kana_near_match_scales_with_distance() {
        // One substitution over five characters: ratio 0.2 → 35 * 0.8 = 28.
        let a = norm(1, None, Some("ヤマダタロウ"), None, None);
        let b = norm(2, None, Some("ヤマダジロウ"), None, None);

        let result = score_pair(&a, &b);
        assert_eq!(result.reasons, vec![MatchReason::PhoneticName]);
        assert!(result.score > 0 && result.score < 35);
    }

    #[test]
    fn test_kana_far_apart_contributes_nothing() {
        let a = norm(1, None, Some("ヤマダ タロウ"), None, None);
        let b = norm(2, None, Some("スズキ ハナコ"), None, None);
        assert_eq!(score_pair(&a, &b).score, 0);
    }

    #[test]
    fn test_display_name_fallback_stays_below_threshold() {
        let a = norm(1, Some("山田 太郎"), None, None, None);
        let b = norm(2, Some("山田 太郎"), None, None, None);

        let result = score_pair(&a, &b);
        assert_eq!(result.reasons, vec![MatchReason::DisplayName]);
        assert!(result.score < DEFAULT_MIN_SCORE);
    }

    #[test]
    fn test_display_name_ignored_when_kana_comparable() {
        // Same display name but clearly different readings: the fallback
        // must not fire on top of the kana comparison.
        let a = norm(1, Some("山田 太郎"), Some("ヤマダ タロウ"), None, None);
        let b = norm(2, Some("山田 太郎"), Some("スズキ ハナコ"), None, None);
        assert_eq!(score_pair(&a, &b).score, 0);
    }

    #[test]
    fn test_score_clamped_to_100() {
        // All four signals cannot fire together (display name requires kana
        // absent), so the maximum is 95 — but the clamp still guards the
        // arithmetic.
        let a = norm(1, None, Some("ヤマダ"), Some("09011112222"), Some("1990-01-01"));
        let b = norm(2, None, Some("ヤマダ"), Some("09011112222"), Some("1990-01-01"));
        assert!(score_pair(&a, &b).score <= 100);
    }

    proptest! {
        #[test]
        fn prop_score_is_symmetric(
            phone_a in proptest::option::of("[0-9]{8,11}"),
            phone_b in proptest::option::of("[0-9]{8,11}"),
            kana_a in proptest::option::of("[ア-ン]{1,6}"),
            kana_b in proptest::option::of("[ア-ン]{1,6}"),
        ) {
            let a = NormalizedIdentity {
                id: 1,
                name: None,
                kana: kana_a,
                phone: phone_a,
                birth_date: None,
                last_active_at: Utc::now(),
            };
            let b = NormalizedIdentity {
                id: 2,
                name: None,
                kana: kana_b,
                phone: phone_b,
                birth_date: None,
                last_active_at: a.last_active_at,
            };
            let ab = score_pair(&a, &b);
            let ba = score_pair(&b, &a);
            prop_assert_eq!(ab.score, ba.score);
            prop_assert_eq!(ab.reasons, ba.reasons);
        }
    }
}

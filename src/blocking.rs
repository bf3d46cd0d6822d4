//! Blocking index: partitions a tenant's population into small candidate
//! buckets so pairwise comparison is not quadratic over the whole tenant.
//!
//! True duplicates almost always share at least one of phone / kana prefix /
//! birth date, so the comparison cost is bounded by the sum of squares of
//! block sizes instead of N².

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::model::{IdPair, NormalizedIdentity, PatientId};

/// Number of trailing phone digits used as a blocking key.
const PHONE_SUFFIX_LEN: usize = 4;

/// Number of leading kana characters used as a blocking key.
const KANA_PREFIX_LEN: usize = 2;

/// A cheap-to-compute partial signal shared by likely duplicates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKey {
    PhoneSuffix(String),
    KanaPrefix(String),
    BirthDate(NaiveDate),
}

/// Mapping from blocking key to the identity ids sharing it.
#[derive(Debug, Default)]
pub struct BlockingIndex {
    blocks: BTreeMap<BlockKey, Vec<PatientId>>,
}

impl BlockingIndex {
    pub fn build(identities: &[NormalizedIdentity]) -> Self {
        let mut blocks: BTreeMap<BlockKey, Vec<PatientId>> = BTreeMap::new();
        for identity in identities {
            for key in block_keys(identity) {
                blocks.entry(key).or_default().push(identity.id);
            }
        }
        Self { blocks }
    }

    /// All unordered pairs of identities sharing at least one blocking key,
    /// each pair exactly once even when it shares several keys.
    pub fn candidate_pairs(&self) -> BTreeSet<IdPair> {
        let mut pairs = BTreeSet::new();
        for ids in self.blocks.values() {
            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    if ids[i] != ids[j] {
                        pairs.insert(IdPair::new(ids[i], ids[j]));
                    }
                }
            }
        }
        pairs
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

fn block_keys(identity: &NormalizedIdentity) -> Vec<BlockKey> {
    let mut keys = Vec::with_capacity(3);

    if let Some(phone) = &identity.phone {
        let chars: Vec<char> = phone.chars().collect();
        if chars.len() >= PHONE_SUFFIX_LEN {
            let suffix: String = chars[chars.len() - PHONE_SUFFIX_LEN..].iter().collect();
            keys.push(BlockKey::PhoneSuffix(suffix));
        }
    }

    if let Some(kana) = &identity.kana {
        let prefix: String = kana
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(KANA_PREFIX_LEN)
            .collect();
        if prefix.chars().count() == KANA_PREFIX_LEN {
            keys.push(BlockKey::KanaPrefix(prefix));
        }
    }

    if let Some(date) = identity.birth_date {
        keys.push(BlockKey::BirthDate(date));
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn norm(
        id: PatientId,
        phone: Option<&str>,
        kana: Option<&str>,
        birth: Option<(i32, u32, u32)>,
    ) -> NormalizedIdentity {
        NormalizedIdentity {
            id,
            name: None,
            kana: kana.map(String::from),
            phone: phone.map(String::from),
            birth_date: birth.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            last_active_at: Utc::now(),
        }
    }

    #[test]
    fn test_shared_phone_suffix_pairs() {
        let ids = vec![
            norm(1, Some("09011112222"), None, None),
            norm(2, Some("08099992222"), None, None),
            norm(3, Some("09033334444"), None, None),
        ];
        let pairs = BlockingIndex::build(&ids).candidate_pairs();
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains(&IdPair::new(1, 2)));
    }

    #[test]
    fn test_pair_sharing_multiple_keys_returned_once() {
        let ids = vec![
            norm(1, Some("09011112222"), Some("ヤマダ タロウ"), Some((1990, 1, 1))),
            norm(2, Some("09011112222"), Some("ヤマダ ジロウ"), Some((1990, 1, 1))),
        ];
        // Shares phone suffix, kana prefix, and birth date — still one pair.
        let pairs = BlockingIndex::build(&ids).candidate_pairs();
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains(&IdPair::new(1, 2)));
    }

    #[test]
    fn test_no_keys_means_no_pairs() {
        let ids = vec![norm(1, None, None, None), norm(2, None, None, None)];
        let index = BlockingIndex::build(&ids);
        assert_eq!(index.block_count(), 0);
        assert!(index.candidate_pairs().is_empty());
    }

    #[test]
    fn test_singleton_blocks_yield_nothing() {
        let ids = vec![
            norm(1, Some("09011112222"), None, None),
            norm(2, Some("08055556666"), None, None),
        ];
        assert!(BlockingIndex::build(&ids).candidate_pairs().is_empty());
    }

    #[test]
    fn test_kana_prefix_ignores_spacing() {
        let ids = vec![
            norm(1, None, Some("ヤマダ タロウ"), None),
            norm(2, None, Some("ヤマシタ ハナコ"), None),
        ];
        // Both start with ヤマ.
        let pairs = BlockingIndex::build(&ids).candidate_pairs();
        assert_eq!(pairs.len(), 1);
    }
}

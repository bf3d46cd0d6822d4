//! Core data model for identity resolution and merge.
//!
//! Everything here is tenant-scoped: patient identities, candidate pairs,
//! ignore-list entries, and merge audit records all carry (or are keyed by)
//! a tenant id. Cross-tenant references are a bug by construction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant identifier, supplied by the (external, already-authorized) tenant resolver.
pub type TenantId = Uuid;

/// Internal patient identifier. Stable for the lifetime of the identity;
/// destroyed only when the identity is merged away.
pub type PatientId = i64;

/// An unordered pair of patient ids in canonical (min, max) form.
///
/// Canonicalizing at construction means (A,B) and (B,A) compare equal
/// everywhere: candidate de-duplication, ignore-list lookups, and lock keys
/// all rely on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdPair {
    low: PatientId,
    high: PatientId,
}

impl IdPair {
    pub fn new(a: PatientId, b: PatientId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> PatientId {
        self.low
    }

    pub fn high(&self) -> PatientId {
        self.high
    }

    pub fn contains(&self, id: PatientId) -> bool {
        self.low == id || self.high == id
    }

    /// Combined id string, used as the final deterministic tie-break when
    /// ranking candidates.
    pub fn combined_key(&self) -> String {
        format!("{}-{}", self.low, self.high)
    }
}

/// One patient record as known to the system.
///
/// Owned by the surrounding patient-management subsystem; this engine reads
/// these rows, rewrites foreign keys that point at them during a merge, and
/// deletes the losing row as the terminal merge step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientIdentity {
    pub id: PatientId,
    pub tenant_id: TenantId,
    pub display_name: String,
    /// Phonetic reading (kana), as entered. Normalized lazily at detection time.
    pub kana: Option<String>,
    pub phone: Option<String>,
    /// Birth date as entered; parsed (or degraded to non-comparable) by the
    /// field normalizer.
    pub birth_date: Option<String>,
    /// Provisional identity created from a LINE contact before full
    /// registration. Shadow rows are frequent merge candidates once the
    /// patient registers properly.
    pub line_shadow: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Canonicalized comparable view of one identity, produced once per
/// detection run by the field normalizer.
#[derive(Debug, Clone)]
pub struct NormalizedIdentity {
    pub id: PatientId,
    pub name: Option<String>,
    pub kana: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub last_active_at: DateTime<Utc>,
}

/// A matched signal contributing to a candidate's confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactPhone,
    PhoneticName,
    BirthDate,
    DisplayName,
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchReason::ExactPhone => "exact phone match",
            MatchReason::PhoneticName => "phonetic name match",
            MatchReason::BirthDate => "birth date match",
            MatchReason::DisplayName => "display name match",
        };
        write!(f, "{s}")
    }
}

/// A suspected-duplicate pairing, recomputed on every detection call and
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub pair: IdPair,
    /// Confidence 0..=100.
    pub score: u8,
    pub reasons: Vec<MatchReason>,
    /// Most recent activity timestamp of either identity; second-level
    /// ranking key after score.
    pub last_active_at: DateTime<Utc>,
}

/// An operator decision that a pair is *not* a duplicate. Never auto-expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredPair {
    pub tenant_id: TenantId,
    pub pair: IdPair,
    pub recorded_at: DateTime<Utc>,
}

/// The dependent tables that reference a patient by id, in the fixed order
/// the merge executor transfers them. The order is part of the resume-point
/// contract: step `i` always means the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentTable {
    Orders,
    Reservations,
    ClinicalNotes,
    MessageLog,
    TagAssignments,
    CustomFieldValues,
    AttentionMarks,
    SegmentClassifications,
    CouponIssuances,
    ScheduledMessages,
    AiReplyDrafts,
    PinnedPatients,
}

impl DependentTable {
    pub const ALL: [DependentTable; 12] = [
        DependentTable::Orders,
        DependentTable::Reservations,
        DependentTable::ClinicalNotes,
        DependentTable::MessageLog,
        DependentTable::TagAssignments,
        DependentTable::CustomFieldValues,
        DependentTable::AttentionMarks,
        DependentTable::SegmentClassifications,
        DependentTable::CouponIssuances,
        DependentTable::ScheduledMessages,
        DependentTable::AiReplyDrafts,
        DependentTable::PinnedPatients,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            DependentTable::Orders => "orders",
            DependentTable::Reservations => "reservations",
            DependentTable::ClinicalNotes => "clinical_notes",
            DependentTable::MessageLog => "message_log",
            DependentTable::TagAssignments => "tag_assignments",
            DependentTable::CustomFieldValues => "custom_field_values",
            DependentTable::AttentionMarks => "attention_marks",
            DependentTable::SegmentClassifications => "segment_classifications",
            DependentTable::CouponIssuances => "coupon_issuances",
            DependentTable::ScheduledMessages => "scheduled_messages",
            DependentTable::AiReplyDrafts => "ai_reply_drafts",
            DependentTable::PinnedPatients => "pinned_patients",
        }
    }

    /// Uniqueness constraint keyed partly on patient id, if any.
    ///
    /// `Some(&[])` means at most one row per patient; `Some(cols)` means one
    /// row per (patient, cols...). A straight rewrite into the keep identity
    /// can collide on these tables; the keep row wins and the remove row is
    /// discarded, with the discard counted and reported.
    pub fn unique_key_columns(self) -> Option<&'static [&'static str]> {
        match self {
            DependentTable::TagAssignments => Some(&["tag_id"]),
            DependentTable::CustomFieldValues => Some(&["field_id"]),
            DependentTable::AttentionMarks => Some(&[]),
            DependentTable::SegmentClassifications => Some(&[]),
            DependentTable::PinnedPatients => Some(&["staff_id"]),
            _ => None,
        }
    }
}

impl std::fmt::Display for DependentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// Per-table outcome of one transfer step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounts {
    /// Rows re-pointed from the removed identity to the kept identity.
    pub transferred: u64,
    /// Rows dropped because the kept identity already had a row under the
    /// same uniqueness key (keep wins).
    pub discarded: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableTransfer {
    pub table: DependentTable,
    pub counts: TransferCounts,
}

/// Result detail returned to the caller of a successful merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDetails {
    pub tenant_id: TenantId,
    pub kept_id: PatientId,
    pub removed_id: PatientId,
    pub tables: Vec<TableTransfer>,
}

impl MergeDetails {
    pub fn total_transferred(&self) -> u64 {
        self.tables.iter().map(|t| t.counts.transferred).sum()
    }

    pub fn total_discarded(&self) -> u64 {
        self.tables.iter().map(|t| t.counts.discarded).sum()
    }
}

/// Terminal outcome of one merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Completed,
    /// A transfer step failed after `resume_point` tables had already been
    /// transferred. The identical merge call can be reissued to completion.
    PartialFailure { resume_point: usize },
    Rejected { reason: String },
}

/// Append-only record of one merge attempt. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeAuditRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub kept_id: PatientId,
    pub removed_id: PatientId,
    pub actor: String,
    pub outcome: MergeOutcome,
    pub table_counts: Vec<TableTransfer>,
    pub recorded_at: DateTime<Utc>,
}

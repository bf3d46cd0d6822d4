//! Field normalizer: canonicalizes raw identity fields into comparable forms.
//!
//! Normalization never fails. Unparsable input degrades to `None`, which the
//! similarity scorer treats as "non-comparable" rather than "mismatch" — a
//! missing birth date must not count against a pair.

use chrono::NaiveDate;

use crate::model::{NormalizedIdentity, PatientIdentity};

impl NormalizedIdentity {
    /// Normalize every comparable field of one identity. Done once per
    /// identity per detection run, not per pair.
    pub fn from_identity(identity: &PatientIdentity) -> Self {
        Self {
            id: identity.id,
            name: normalize_name(&identity.display_name),
            kana: identity.kana.as_deref().and_then(normalize_kana),
            phone: identity.phone.as_deref().and_then(normalize_phone),
            birth_date: identity.birth_date.as_deref().and_then(normalize_birth_date),
            last_active_at: identity.last_active_at,
        }
    }
}

/// Fold a full-width digit (０-９) to its ASCII equivalent, passing
/// everything else through.
fn fold_fullwidth_digit(c: char) -> char {
    if ('０'..='９').contains(&c) {
        // Safe: offsetting within the ASCII digit range.
        char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c)
    } else {
        c
    }
}

/// Normalize a phone number to the single national (leading-zero) form:
/// strip all formatting, fold full-width digits, and rewrite the +81 / 81
/// international prefix to a leading 0.
///
/// Returns `None` when fewer than 8 digits survive — too short to be a
/// comparable number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let has_plus = raw.trim_start().starts_with('+');

    let digits: String = raw
        .chars()
        .map(fold_fullwidth_digit)
        .filter(|c| c.is_ascii_digit())
        .collect();

    // "+81 90-..." and bare "8190..." both mean the 090 national number.
    // Domestic numbers always start with 0, so an 11+ digit string starting
    // with 81 can only be the country-code form.
    let national = if digits.starts_with("81") && (has_plus || digits.len() >= 11) {
        format!("0{}", &digits[2..])
    } else {
        digits
    };

    if national.len() < 8 {
        None
    } else {
        Some(national)
    }
}

/// Full-width katakana for a half-width katakana character, ignoring the
/// voicing marks (handled separately via lookahead).
fn halfwidth_kana_base(c: char) -> Option<char> {
    Some(match c {
        'ｱ' => 'ア', 'ｲ' => 'イ', 'ｳ' => 'ウ', 'ｴ' => 'エ', 'ｵ' => 'オ',
        'ｶ' => 'カ', 'ｷ' => 'キ', 'ｸ' => 'ク', 'ｹ' => 'ケ', 'ｺ' => 'コ',
        'ｻ' => 'サ', 'ｼ' => 'シ', 'ｽ' => 'ス', 'ｾ' => 'セ', 'ｿ' => 'ソ',
        'ﾀ' => 'タ', 'ﾁ' => 'チ', 'ﾂ' => 'ツ', 'ﾃ' => 'テ', 'ﾄ' => 'ト',
        'ﾅ' => 'ナ', 'ﾆ' => 'ニ', 'ﾇ' => 'ヌ', 'ﾈ' => 'ネ', 'ﾉ' => 'ノ',
        'ﾊ' => 'ハ', 'ﾋ' => 'ヒ', 'ﾌ' => 'フ', 'ﾍ' => 'ヘ', 'ﾎ' => 'ホ',
        'ﾏ' => 'マ', 'ﾐ' => 'ミ', 'ﾑ' => 'ム', 'ﾒ' => 'メ', 'ﾓ' => 'モ',
        'ﾔ' => 'ヤ', 'ﾕ' => 'ユ', 'ﾖ' => 'ヨ',
        'ﾗ' => 'ラ', 'ﾘ' => 'リ', 'ﾙ' => 'ル', 'ﾚ' => 'レ', 'ﾛ' => 'ロ',
        'ﾜ' => 'ワ', 'ｦ' => 'ヲ', 'ﾝ' => 'ン',
        'ｧ' => 'ァ', 'ｨ' => 'ィ', 'ｩ' => 'ゥ', 'ｪ' => 'ェ', 'ｫ' => 'ォ',
        'ｬ' => 'ャ', 'ｭ' => 'ュ', 'ｮ' => 'ョ', 'ｯ' => 'ッ',
        '･' => '・',
        _ => return None,
    })
}

/// Combine a full-width base kana with a half-width voicing mark
/// (ﾞ dakuten / ﾟ handakuten): ｶ+ﾞ → ガ, ﾊ+ﾟ → パ, ｳ+ﾞ → ヴ.
fn apply_voicing(base: char, mark: char) -> char {
    match mark {
        'ﾞ' => match base {
            'ウ' => 'ヴ',
            'カ' | 'キ' | 'ク' | 'ケ' | 'コ' | 'サ' | 'シ' | 'ス' | 'セ' | 'ソ' | 'タ'
            | 'チ' | 'ツ' | 'テ' | 'ト' | 'ハ' | 'ヒ' | 'フ' | 'ヘ' | 'ホ' => {
                char::from_u32(base as u32 + 1).unwrap_or(base)
            }
            _ => base,
        },
        'ﾟ' => match base {
            'ハ' | 'ヒ' | 'フ' | 'ヘ' | 'ホ' => char::from_u32(base as u32 + 2).unwrap_or(base),
            _ => base,
        },
        _ => base,
    }
}

/// Normalize a phonetic reading to a single comparable form: half-width
/// katakana widened (voicing marks folded in), hiragana folded to katakana,
/// the long-vowel mark dropped, and whitespace (ASCII or ideographic)
/// collapsed to single spaces.
///
/// "ﾔﾏﾀﾞ ﾀﾛｳ", "やまだ　たろう" and "ヤマダ タロウ" all normalize to
/// "ヤマダ タロウ".
pub fn normalize_kana(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        // Half-width katakana, possibly followed by a voicing mark.
        let c = match halfwidth_kana_base(c) {
            Some(base) => {
                if matches!(chars.peek(), Some('ﾞ' | 'ﾟ')) {
                    match chars.next() {
                        Some(mark) => apply_voicing(base, mark),
                        None => base,
                    }
                } else {
                    base
                }
            }
            None => c,
        };

        // Hiragana block folds onto katakana with a fixed codepoint offset.
        let c = if ('ぁ'..='ゖ').contains(&c) {
            char::from_u32(c as u32 + 0x60).unwrap_or(c)
        } else {
            c
        };

        match c {
            // Long-vowel variants collapse: "ユウコ" and "ユーコ" should
            // compare by edit distance, not be blocked apart.
            'ー' | 'ｰ' => {}
            c if c.is_whitespace() => {
                if !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            c => out.push(c),
        }
    }

    let trimmed = out.trim_end().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Parse a birth date in any of the forms operators actually type.
pub fn normalize_birth_date(raw: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d"];

    let folded: String = raw.trim().chars().map(fold_fullwidth_digit).collect();
    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(&folded, f).ok())
}

/// Trim and collapse internal whitespace in a display name.
pub fn normalize_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

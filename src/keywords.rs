//! Curated label keywords and label-text matching.
//!
//! A [`KeywordSet`] is built once (defaults or a config file) and shared
//! read-only by every classifier run. Matching is case-insensitive and works
//! on whole words, so "Surname" does not match "name" but "Full Name:" does.
//! Long phrases also match with small OCR misspellings ("Adress").

use crate::field::FieldType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One keyword phrase and the field type it implies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub phrase: String,
    pub field_type: FieldType,
}

impl KeywordRule {
    pub fn new(phrase: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            phrase: phrase.into(),
            field_type,
        }
    }
}

/// Result of matching a label against the keyword set.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub field_type: FieldType,
    pub phrase: String,
    /// 1.0 for an exact whole-word hit, the similarity for a fuzzy hit.
    pub strength: f32,
}

/// Phrases shorter than this are only ever matched exactly.
const MIN_FUZZY_LEN: usize = 5;

/// Immutable keyword registry.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    rules: Vec<KeywordRule>,
    /// Pre-normalised phrase words, parallel to `rules`.
    words: Vec<Vec<String>>,
}

impl KeywordSet {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        let words = rules.iter().map(|r| normalise_words(&r.phrase)).collect();
        Self { rules, words }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Best keyword hit for `text`, if any.
    ///
    /// Preference: higher strength, then more words in the phrase, then a
    /// specific type over `text`, then earlier rule.
    pub fn classify(&self, text: &str, fuzzy_threshold: f32) -> Option<KeywordMatch> {
        let label = normalise_words(text);
        if label.is_empty() {
            return None;
        }

        let mut best: Option<(f32, usize, bool, usize)> = None;
        for (idx, phrase) in self.words.iter().enumerate() {
            if phrase.is_empty() || phrase.len() > label.len() {
                continue;
            }
            let strength = match_strength(&label, phrase, fuzzy_threshold);
            if strength <= 0.0 {
                continue;
            }
            let specific = self.rules[idx].field_type != FieldType::Text;
            let better = match best {
                None => true,
                Some((s, n, sp, _)) => {
                    strength > s
                        || (strength == s && phrase.len() > n)
                        || (strength == s && phrase.len() == n && specific && !sp)
                }
            };
            if better {
                best = Some((strength, phrase.len(), specific, idx));
            }
        }

        best.map(|(strength, _, _, idx)| KeywordMatch {
            field_type: self.rules[idx].field_type,
            phrase: self.rules[idx].phrase.clone(),
            strength,
        })
    }
}

impl Default for KeywordSet {
    fn default() -> Self {
        use FieldType::*;
        let table: &[(&str, FieldType)] = &[
            ("name", Text),
            ("full name", Text),
            ("address", Text),
            ("occupation", Text),
            ("nationality", Text),
            ("company", Text),
            ("organisation", Text),
            ("organization", Text),
            ("gender", Text),
            ("sex", Text),
            ("race", Text),
            ("religion", Text),
            ("remarks", Text),
            ("purpose", Text),
            ("email", Email),
            ("e mail", Email),
            ("phone", Phone),
            ("telephone", Phone),
            ("tel", Phone),
            ("mobile", Phone),
            ("contact no", Phone),
            ("contact number", Phone),
            ("fax", Phone),
            ("date", Date),
            ("dob", Date),
            ("date of birth", Date),
            ("expiry", Date),
            ("issue date", Date),
            ("nric", Nric),
            ("fin", Nric),
            ("ic no", Nric),
            ("identification no", Nric),
            ("passport no", Nric),
            ("age", Number),
            ("postal code", Number),
            ("zip", Number),
            ("unit no", Number),
            ("block", Number),
            ("amount", Number),
            ("signature", Signature),
            ("signed", Signature),
            ("i agree", Checkbox),
            ("i consent", Checkbox),
            ("tick", Checkbox),
        ];
        Self::new(
            table
                .iter()
                .map(|(p, t)| KeywordRule::new(*p, *t))
                .collect(),
        )
    }
}

/// Lowercase words of `text`, non-alphanumerics treated as separators.
pub fn normalise_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn match_strength(label: &[String], phrase: &[String], fuzzy_threshold: f32) -> f32 {
    let n = phrase.len();
    let joined_phrase = phrase.join(" ");
    let mut best = 0.0f32;
    for window in label.windows(n) {
        if window == phrase {
            return 1.0;
        }
        if joined_phrase.chars().count() < MIN_FUZZY_LEN {
            continue;
        }
        let candidate = window.join(" ");
        let sim = strsim::normalized_levenshtein(&candidate, &joined_phrase) as f32;
        if sim >= fuzzy_threshold && sim > best {
            best = sim;
        }
    }
    best
}

// ── Label hygiene ────────────────────────────────────────────────────────

static RE_TRAILING_MARKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[:\*\s_.]+$").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_REQUIRED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\*|\brequired\b|\bmandatory\b").unwrap());
static RE_SENTENCE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(The|This|These|Those|Please|If)\b").unwrap());

/// Strip trailing colons/asterisks/rules and collapse whitespace.
pub fn clean_label(text: &str) -> String {
    let collapsed = RE_SPACES.replace_all(text.trim(), " ");
    RE_TRAILING_MARKS.replace(&collapsed, "").trim().to_string()
}

/// Labels marked with `*`, "required" or "mandatory".
pub fn is_required(text: &str) -> bool {
    RE_REQUIRED.is_match(text)
}

/// Sentence-like text: instructions and prose rather than a field label.
pub fn looks_like_instruction(text: &str) -> bool {
    let t = text.trim();
    let word_count = t.split_whitespace().count();

    if word_count >= 9 && !t.contains(':') && !t.contains('_') {
        return true;
    }
    if t.ends_with('.') && word_count >= 6 {
        return true;
    }
    if t.contains(',') && word_count >= 6 && !t.contains('_') {
        return true;
    }
    RE_SENTENCE_START.is_match(t) && word_count >= 6
}

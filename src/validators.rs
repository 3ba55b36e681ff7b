//! Field type validator registry.
//!
//! Each [`FieldType`] maps to one stateless [`ValidationRule`]. Rules return
//! the canonical form of an accepted answer (ISO dates, uppercase NRIC,
//! digits-only phones) and normalisation is idempotent: feeding a normalized
//! value back in yields the same string.
//!
//! The registry is consulted by the wizard before any write to a field's
//! value slot, and by fusion as a soft plausibility hint when the two
//! detectors disagree on a field's type.

use crate::config::{NricScheme, ValidationSettings};
use crate::error::ValidationError;
use crate::field::FieldType;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// A pure validation rule for one field type.
pub trait ValidationRule: Send + Sync {
    fn field_type(&self) -> FieldType;

    /// Validate a trimmed, non-empty answer and return its canonical form.
    fn normalize(&self, raw: &str) -> Result<String, ValidationError>;

    /// Short human hint describing the expected format.
    fn hint(&self) -> &str;
}

fn invalid(field_type: FieldType, hint: &str) -> ValidationError {
    ValidationError::Invalid {
        field_type,
        hint: hint.to_string(),
    }
}

// ── Email ────────────────────────────────────────────────────────────────

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

struct EmailRule;

impl ValidationRule for EmailRule {
    fn field_type(&self) -> FieldType {
        FieldType::Email
    }

    fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        if !RE_EMAIL.is_match(raw) {
            return Err(invalid(FieldType::Email, self.hint()));
        }
        match raw.rsplit_once('@') {
            Some((local, domain)) => Ok(format!("{local}@{}", domain.to_lowercase())),
            None => Err(invalid(FieldType::Email, self.hint())),
        }
    }

    fn hint(&self) -> &str {
        "Please enter a valid email address (e.g. name@example.com)."
    }
}

// ── Phone ────────────────────────────────────────────────────────────────

struct PhoneRule {
    min_digits: usize,
    max_digits: usize,
    hint: String,
}

impl ValidationRule for PhoneRule {
    fn field_type(&self) -> FieldType {
        FieldType::Phone
    }

    fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        let (plus, rest) = match raw.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let digits: String = rest
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
            .collect();
        if digits.is_empty()
            || !digits.chars().all(|c| c.is_ascii_digit())
            || digits.len() < self.min_digits
            || digits.len() > self.max_digits
        {
            return Err(invalid(FieldType::Phone, &self.hint));
        }
        Ok(if plus { format!("+{digits}") } else { digits })
    }

    fn hint(&self) -> &str {
        &self.hint
    }
}

// ── Date ─────────────────────────────────────────────────────────────────

struct DateRule {
    formats: Vec<String>,
}

impl ValidationRule for DateRule {
    fn field_type(&self) -> FieldType {
        FieldType::Date
    }

    fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        // ISO first so normalized output always re-parses to itself.
        std::iter::once("%Y-%m-%d")
            .chain(self.formats.iter().map(String::as_str))
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .ok_or_else(|| invalid(FieldType::Date, self.hint()))
    }

    fn hint(&self) -> &str {
        "Please enter a valid date (DD/MM/YYYY or YYYY-MM-DD)."
    }
}

// ── NRIC / national ID ───────────────────────────────────────────────────

static RE_SG_NRIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([STFGM])([0-9]{7})([A-Z])$").unwrap());

const NRIC_WEIGHTS: [u32; 7] = [2, 7, 6, 5, 4, 3, 2];
const ST_CHECK: &[u8; 11] = b"JZIHGFEDCBA";
const FG_CHECK: &[u8; 11] = b"XWUTRQPNMLK";

struct NricRule {
    pattern: Option<Regex>,
}

impl NricRule {
    fn singapore_valid(id: &str) -> bool {
        let Some(caps) = RE_SG_NRIC.captures(id) else {
            return false;
        };
        let prefix = caps[1].as_bytes()[0];
        let check = caps[3].as_bytes()[0];
        let mut sum: u32 = caps[2]
            .bytes()
            .zip(NRIC_WEIGHTS)
            .map(|(d, w)| u32::from(d - b'0') * w)
            .sum();
        if matches!(prefix, b'T' | b'G') {
            sum += 4;
        }
        let idx = (sum % 11) as usize;
        match prefix {
            b'S' | b'T' => ST_CHECK[idx] == check,
            b'F' | b'G' => FG_CHECK[idx] == check,
            // M-series FINs use a newer table; accept the shape.
            _ => true,
        }
    }
}

impl ValidationRule for NricRule {
    fn field_type(&self) -> FieldType {
        FieldType::Nric
    }

    fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        let id: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        let ok = match &self.pattern {
            Some(re) => re.is_match(&id),
            None => Self::singapore_valid(&id),
        };
        if ok {
            Ok(id)
        } else {
            Err(invalid(FieldType::Nric, self.hint()))
        }
    }

    fn hint(&self) -> &str {
        "Please enter a valid NRIC/FIN (e.g. S1234567D)."
    }
}

// ── Number ───────────────────────────────────────────────────────────────

struct NumberRule {
    min: Option<f64>,
    max: Option<f64>,
}

impl ValidationRule for NumberRule {
    fn field_type(&self) -> FieldType {
        FieldType::Number
    }

    fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !matches!(c, ',' | ' ' | '_'))
            .collect();
        let value: f64 = cleaned
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| invalid(FieldType::Number, self.hint()))?;

        let min = self.min.unwrap_or(f64::NEG_INFINITY);
        let max = self.max.unwrap_or(f64::INFINITY);
        if value < min || value > max {
            return Err(ValidationError::OutOfRange { value, min, max });
        }

        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{}", value as i64))
        } else {
            Ok(format!("{value}"))
        }
    }

    fn hint(&self) -> &str {
        "Please enter a number."
    }
}

// ── Free text (text, signature, checkbox, unknown) ───────────────────────

struct FreeTextRule {
    field_type: FieldType,
}

impl ValidationRule for FreeTextRule {
    fn field_type(&self) -> FieldType {
        self.field_type
    }

    fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        Ok(raw.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    fn hint(&self) -> &str {
        ""
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Immutable field-type → rule mapping.
#[derive(Clone)]
pub struct ValidatorRegistry {
    rules: HashMap<FieldType, Arc<dyn ValidationRule>>,
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.rules.keys().collect();
        types.sort();
        f.debug_struct("ValidatorRegistry")
            .field("types", &types)
            .finish()
    }
}

impl ValidatorRegistry {
    /// Build the registry from validation settings.
    ///
    /// A custom NRIC pattern that fails to compile falls back to the
    /// Singapore scheme; [`crate::DetectionConfigBuilder::build`] rejects
    /// such patterns up front.
    pub fn new(settings: &ValidationSettings) -> Self {
        let mut rules: HashMap<FieldType, Arc<dyn ValidationRule>> = HashMap::new();
        rules.insert(FieldType::Email, Arc::new(EmailRule));
        rules.insert(
            FieldType::Phone,
            Arc::new(PhoneRule {
                min_digits: settings.phone_min_digits,
                max_digits: settings.phone_max_digits,
                hint: format!(
                    "Please enter a valid phone number ({}–{} digits).",
                    settings.phone_min_digits, settings.phone_max_digits
                ),
            }),
        );
        rules.insert(
            FieldType::Date,
            Arc::new(DateRule {
                formats: settings.date_formats.clone(),
            }),
        );
        let pattern = match &settings.nric_scheme {
            NricScheme::Singapore => None,
            NricScheme::Pattern(p) => Regex::new(p).ok(),
        };
        rules.insert(FieldType::Nric, Arc::new(NricRule { pattern }));
        rules.insert(
            FieldType::Number,
            Arc::new(NumberRule {
                min: settings.number_min,
                max: settings.number_max,
            }),
        );
        for ft in [
            FieldType::Text,
            FieldType::Signature,
            FieldType::Checkbox,
            FieldType::Unknown,
        ] {
            rules.insert(ft, Arc::new(FreeTextRule { field_type: ft }));
        }
        Self { rules }
    }

    /// The rule registered for `field_type`.
    pub fn rule(&self, field_type: FieldType) -> &dyn ValidationRule {
        // Every variant is inserted in `new`.
        self.rules[&field_type].as_ref()
    }

    /// Validate an answer. Blank answers pass (as `""`) unless `required`.
    pub fn validate(
        &self,
        field_type: FieldType,
        raw: &str,
        required: bool,
    ) -> Result<String, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return if required {
                Err(ValidationError::Required)
            } else {
                Ok(String::new())
            };
        }
        self.rule(field_type).normalize(trimmed)
    }

    /// True when `raw` is a non-blank, valid answer for `field_type`.
    pub fn accepts(&self, field_type: FieldType, raw: &str) -> bool {
        !raw.trim().is_empty() && self.validate(field_type, raw, false).is_ok()
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new(&ValidationSettings::default())
    }
}

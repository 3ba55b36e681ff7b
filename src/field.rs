//! Field records: detector proposals and the fused, ordered result.

use crate::error::ValidationError;
use crate::geometry::BBox;
use crate::validators::ValidatorRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed vocabulary of field types.
///
/// Parsing never fails: unrecognised strings become [`FieldType::Unknown`],
/// so no field can carry a type outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Email,
    Phone,
    Date,
    Number,
    Nric,
    Checkbox,
    Signature,
    Unknown,
}

impl FieldType {
    pub const ALL: [FieldType; 9] = [
        FieldType::Text,
        FieldType::Email,
        FieldType::Phone,
        FieldType::Date,
        FieldType::Number,
        FieldType::Nric,
        FieldType::Checkbox,
        FieldType::Signature,
        FieldType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Nric => "nric",
            FieldType::Checkbox => "checkbox",
            FieldType::Signature => "signature",
            FieldType::Unknown => "unknown",
        }
    }

    /// Lenient mapping from model/user vocabulary.
    pub fn parse_lenient(s: &str) -> FieldType {
        let key: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "text" | "string" | "name" | "address" => FieldType::Text,
            "email" | "emailaddress" | "mail" => FieldType::Email,
            "phone" | "telephone" | "tel" | "mobile" | "phonenumber" => FieldType::Phone,
            "date" | "dob" | "dateofbirth" => FieldType::Date,
            "number" | "numeric" | "integer" | "int" | "float" => FieldType::Number,
            "nric" | "id" | "ic" | "icno" | "fin" | "nationalid" => FieldType::Nric,
            "checkbox" | "check" | "tick" | "boolean" | "bool" => FieldType::Checkbox,
            "signature" | "sign" => FieldType::Signature,
            _ => FieldType::Unknown,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FieldType::parse_lenient(s))
    }
}

/// Which detector proposed a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorSource {
    Heuristic,
    Llm,
}

/// A proposed field from one detector, prior to fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateField {
    pub label: String,
    pub field_type: FieldType,
    /// Where the answer goes (the blank), not where the label is.
    pub anchor: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_bbox: Option<BBox>,
    pub page_index: usize,
    pub source: DetectorSource,
    /// 0–1.
    pub confidence: f32,
    #[serde(default)]
    pub required: bool,
}

impl CandidateField {
    pub fn new(
        label: impl Into<String>,
        field_type: FieldType,
        anchor: BBox,
        page_index: usize,
        source: DetectorSource,
        confidence: f32,
    ) -> Self {
        Self {
            label: label.into(),
            field_type,
            anchor,
            label_bbox: None,
            page_index,
            source,
            confidence: confidence.clamp(0.0, 1.0),
            required: false,
        }
    }

    pub fn with_label_bbox(mut self, bbox: BBox) -> Self {
        self.label_bbox = Some(bbox);
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// The authoritative, ordered field handed to the wizard and the exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    /// `f000`, `f001`, … derived from `order_index`.
    pub id: String,
    pub label: String,
    pub field_type: FieldType,
    /// Key into [`ValidatorRegistry`]; the resolved type unless a caller
    /// overrides it.
    pub rule: FieldType,
    pub anchor: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_bbox: Option<BBox>,
    pub page_index: usize,
    /// Dense, zero-based, unique per document.
    pub order_index: usize,
    pub required: bool,
    pub confidence: f32,
    pub sources: Vec<DetectorSource>,
    value: Option<String>,
}

impl FormField {
    /// Build an unordered field from a fusion result. Ordering assigns the
    /// final `order_index` and `id`.
    pub(crate) fn from_candidate(
        winner: &CandidateField,
        label: String,
        field_type: FieldType,
        confidence: f32,
        required: bool,
        sources: Vec<DetectorSource>,
        provisional_index: usize,
    ) -> Self {
        Self {
            id: format!("f{provisional_index:03}"),
            label,
            field_type,
            rule: field_type,
            anchor: winner.anchor,
            label_bbox: winner.label_bbox,
            page_index: winner.page_index,
            order_index: provisional_index,
            required,
            confidence,
            sources,
            value: None,
        }
    }

    /// Box used for reading order: the label when known, else the blank.
    pub fn reading_box(&self) -> BBox {
        self.label_bbox.unwrap_or(self.anchor)
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_filled(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.is_empty())
    }

    /// Validate `raw` against this field's rule and store the normalized
    /// value. On error the slot is left untouched.
    pub fn set_value(
        &mut self,
        raw: &str,
        registry: &ValidatorRegistry,
    ) -> Result<&str, ValidationError> {
        let normalized = registry.validate(self.rule, raw, self.required)?;
        self.value = Some(normalized);
        Ok(self.value.as_deref().unwrap_or_default())
    }

    pub fn clear_value(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationSettings;

    fn field(field_type: FieldType, required: bool) -> FormField {
        let c = CandidateField::new(
            "Email",
            field_type,
            BBox::new(0.0, 0.0, 10.0, 10.0),
            0,
            DetectorSource::Heuristic,
            0.9,
        );
        FormField::from_candidate(
            &c,
            "Email".into(),
            field_type,
            0.9,
            required,
            vec![DetectorSource::Heuristic],
            0,
        )
    }

    #[test]
    fn lenient_parse_maps_synonyms() {
        assert_eq!("E-mail".parse::<FieldType>().unwrap(), FieldType::Email);
        assert_eq!(FieldType::parse_lenient("ID"), FieldType::Nric);
        assert_eq!(FieldType::parse_lenient("tick"), FieldType::Checkbox);
        assert_eq!(FieldType::parse_lenient("hologram"), FieldType::Unknown);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&FieldType::Nric).unwrap();
        assert_eq!(json, "\"nric\"");
    }

    #[test]
    fn set_value_stores_normalized() {
        let registry = ValidatorRegistry::new(&ValidationSettings::default());
        let mut f = field(FieldType::Email, false);
        let stored = f.set_value("  Jane@Example.COM ", &registry).unwrap().to_string();
        assert_eq!(stored, "Jane@example.com");
        assert_eq!(f.value(), Some("Jane@example.com"));
    }

    #[test]
    fn rejected_value_leaves_slot_unchanged() {
        let registry = ValidatorRegistry::new(&ValidationSettings::default());
        let mut f = field(FieldType::Email, false);
        f.set_value("a@b.co", &registry).unwrap();
        assert!(f.set_value("not an email", &registry).is_err());
        assert_eq!(f.value(), Some("a@b.co"));
    }

    #[test]
    fn required_blank_is_rejected() {
        let registry = ValidatorRegistry::new(&ValidationSettings::default());
        let mut f = field(FieldType::Text, true);
        assert_eq!(f.set_value("   ", &registry), Err(ValidationError::Required));
        assert!(!f.is_filled());
    }
}

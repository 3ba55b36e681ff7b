//! Prompts for LLM-assisted field extraction.
//!
//! Callers can override the system prompt via
//! [`crate::config::DetectionConfig::system_prompt`]; the constant here is
//! used only when no override is provided. The user message is always built
//! by [`build_extraction_payload`] so the response format stays in sync with
//! the parser in [`crate::pipeline::llm`].

use crate::field::FieldType;
use crate::geometry::{LineKey, Page};

/// Default system prompt for extracting fillable fields from form text.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert at reading paper forms. You receive the OCR text of a scanned form, page by page, in the order the OCR engine emitted it. Your task is to list every field a person is expected to fill in.

Follow these rules precisely:

1. WHAT IS A FIELD
   - A field is a label followed by a place to write an answer: a blank line, a box, a gap, or a tick box
   - Section headings, instructions, notes, and the form title are NOT fields
   - Sections marked "for office use" are NOT fields

2. LABELS
   - Copy the label text exactly as it appears in the OCR text, without the trailing colon
   - Do not merge two labels that appear on the same line into one field

3. TYPES
   - Choose field_type from the vocabulary given in the request, nothing else
   - Use "unknown" when no type fits

4. OUTPUT FORMAT
   - Output ONLY a JSON object: {"fields":[{"label":"...","field_type":"...","page":0,"required":false,"confidence":0.9}]}
   - "page" is the zero-based page number shown in the request
   - "confidence" is your certainty between 0 and 1
   - Do NOT wrap the JSON in markdown fences
   - Do NOT add commentary or explanations"#;

/// Reconstruct page text from tokens in emission order.
///
/// A newline is inserted whenever the OCR line key changes; tokens without
/// a line key are joined into a single line per page. At most `max_lines`
/// lines are kept per page.
pub fn page_text(page: &Page, max_lines: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Option<Option<LineKey>> = None;

    for token in &page.tokens {
        let text = token.text.trim();
        if text.is_empty() {
            continue;
        }
        if current != Some(token.line) {
            if lines.len() == max_lines {
                break;
            }
            lines.push(String::new());
            current = Some(token.line);
        }
        if let Some(line) = lines.last_mut() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(text);
        }
    }

    lines.join("\n")
}

/// Build the user message: the vocabulary followed by every page's text.
pub fn build_extraction_payload(pages: &[Page], max_lines: usize) -> String {
    let vocabulary: Vec<&str> = FieldType::ALL.iter().map(|t| t.as_str()).collect();
    let mut out = format!(
        "Allowed field_type values: {}\n",
        vocabulary.join(", ")
    );
    for page in pages {
        out.push_str(&format!(
            "\n=== PAGE {} ===\n{}\n",
            page.index,
            page_text(page, max_lines)
        ));
    }
    out
}

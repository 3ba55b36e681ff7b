//! Fusion of heuristic and LLM candidates into one field list.
//!
//! Each heuristic candidate seeds its own cluster. An LLM candidate joins the
//! nearest heuristic candidate whose anchor overlaps its own or whose anchor
//! center is closer than `proximity_radius_px`; an LLM candidate with no
//! such neighbour forms a cluster of its own. Candidates from the same
//! detector are never merged. Each cluster becomes one [`FormField`]:
//!
//! * geometry always comes from the heuristic candidate when there is one;
//! * agreeing types are kept; on disagreement the heuristic type wins only
//!   above `high_confidence_threshold`, after a soft validator hint;
//! * the longer label wins (ties go to the heuristic);
//! * clusters below `confidence_floor` are noise and are dropped.

use crate::config::Thresholds;
use crate::error::FormScanError;
use crate::field::{CandidateField, DetectorSource, FieldType, FormField};
use crate::geometry::Page;
use crate::validators::ValidatorRegistry;
use tracing::debug;

/// Cluster bookkeeping for one fusion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub clusters: usize,
    pub dropped: usize,
}

fn same_field(a: &CandidateField, b: &CandidateField, radius: f32) -> bool {
    a.page_index == b.page_index
        && (a.anchor.intersects(&b.anchor) || a.anchor.center_distance(&b.anchor) < radius)
}

/// Index of the heuristic candidate an LLM candidate folds into: the
/// nearest by anchor-centre distance among those within reach, ties to the
/// earlier one.
fn nearest_heuristic(llm: &CandidateField, heuristic: &[CandidateField], radius: f32) -> Option<usize> {
    heuristic
        .iter()
        .enumerate()
        .filter(|(_, h)| same_field(h, llm, radius))
        .min_by(|(i, a), (j, b)| {
            a.anchor
                .center_distance(&llm.anchor)
                .total_cmp(&b.anchor.center_distance(&llm.anchor))
                .then(i.cmp(j))
        })
        .map(|(i, _)| i)
}

/// Highest-confidence member from `source`; ties keep the earlier one.
fn best_of<'a>(members: &[&'a CandidateField], source: DetectorSource) -> Option<&'a CandidateField> {
    members
        .iter()
        .copied()
        .filter(|c| c.source == source)
        .fold(None, |best: Option<&CandidateField>, c| match best {
            Some(b) if b.confidence >= c.confidence => Some(b),
            _ => Some(c),
        })
}

/// OCR text whose token centers fall inside the candidate's anchor.
fn text_in_anchor(candidate: &CandidateField, pages: &[Page]) -> String {
    pages
        .iter()
        .find(|p| p.index == candidate.page_index)
        .map(|page| {
            page.tokens
                .iter()
                .filter(|t| !t.is_rule() && t.bbox.center_within(&candidate.anchor))
                .map(|t| t.text.trim())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// Pick a type when the detectors disagree.
fn resolve_type(
    heuristic: &CandidateField,
    llm: &CandidateField,
    pages: &[Page],
    registry: &ValidatorRegistry,
    t: &Thresholds,
) -> FieldType {
    let mut confidence = heuristic.confidence;
    let text = text_in_anchor(heuristic, pages);
    if !text.is_empty() {
        let h_ok = registry.accepts(heuristic.field_type, &text);
        let l_ok = registry.accepts(llm.field_type, &text);
        if h_ok && !l_ok {
            confidence += t.plausibility_bonus;
        } else if l_ok && !h_ok {
            confidence -= t.plausibility_bonus;
        }
    }
    if confidence > t.high_confidence_threshold {
        heuristic.field_type
    } else {
        llm.field_type
    }
}

/// Merge both detectors' candidates into unordered fields.
///
/// Fields come back in cluster order (heuristic clusters in input order,
/// then LLM-only ones) with provisional order indices; [`crate::pipeline::ordering::order_fields`] assigns the
/// final ones.
pub fn fuse(
    heuristic: &[CandidateField],
    llm: &[CandidateField],
    pages: &[Page],
    registry: &ValidatorRegistry,
    t: &Thresholds,
) -> Result<(Vec<FormField>, FusionStats), FormScanError> {
    // Every heuristic candidate is its own cluster; detectors never merge
    // with themselves.
    let mut clusters: Vec<Vec<&CandidateField>> = heuristic.iter().map(|h| vec![h]).collect();
    for cand in llm {
        match nearest_heuristic(cand, heuristic, t.proximity_radius_px) {
            Some(i) => clusters[i].push(cand),
            None => clusters.push(vec![cand]),
        }
    }

    let mut stats = FusionStats {
        clusters: clusters.len(),
        dropped: 0,
    };
    let mut fields = Vec::new();

    for members in &clusters {
        let h = best_of(members, DetectorSource::Heuristic);
        let l = best_of(members, DetectorSource::Llm);
        let required = members.iter().any(|c| c.required);

        let (winner, label, field_type, confidence, sources) = match (h, l) {
            (Some(h), Some(l)) => {
                let field_type = if h.field_type == l.field_type {
                    h.field_type
                } else {
                    resolve_type(h, l, pages, registry, t)
                };
                let label = if l.label.chars().count() > h.label.chars().count() {
                    &l.label
                } else {
                    &h.label
                };
                (
                    h,
                    label.clone(),
                    field_type,
                    h.confidence.max(l.confidence),
                    vec![DetectorSource::Heuristic, DetectorSource::Llm],
                )
            }
            (Some(only), None) | (None, Some(only)) => (
                only,
                only.label.clone(),
                only.field_type,
                only.confidence,
                vec![only.source],
            ),
            (None, None) => continue,
        };

        if confidence < t.confidence_floor {
            debug!(
                "Dropping '{}' (confidence {:.2} below floor {:.2})",
                label, confidence, t.confidence_floor
            );
            stats.dropped += 1;
            continue;
        }

        let index = fields.len();
        fields.push(FormField::from_candidate(
            winner, label, field_type, confidence, required, sources, index,
        ));
    }

    if fields.is_empty() {
        return Err(FormScanError::NoFieldsDetected {
            heuristic: heuristic.len(),
            llm: llm.len(),
        });
    }

    debug!(
        "Fused {} heuristic + {} LLM candidates into {} fields ({} dropped)",
        heuristic.len(),
        llm.len(),
        fields.len(),
        stats.dropped
    );
    Ok((fields, stats))
}

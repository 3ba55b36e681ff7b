//! Property tests for ordering, validation, fusion and the heuristic path.

use formscan::pipeline::fusion::fuse;
use formscan::pipeline::ordering::order_fields;
use formscan::{
    detect_fields, BBox, CandidateField, DetectionConfig, DetectorSource, FieldType, FormField,
    Page, Thresholds, Token, ValidationSettings, ValidatorRegistry,
};
use proptest::prelude::*;
use std::collections::HashSet;

// ── Strategies ───────────────────────────────────────────────────────────────

/// Candidates spread far enough apart that fusion keeps each one.
fn spread_candidates() -> impl Strategy<Value = Vec<CandidateField>> {
    prop::collection::vec((0usize..3, 0u32..8, 0u32..6, 0.4f32..1.0), 1..24).prop_map(|cells| {
        let mut seen = HashSet::new();
        cells
            .into_iter()
            .filter(|(page, row, col, _)| seen.insert((*page, *row, *col)))
            .map(|(page, row, col, conf)| {
                let anchor = BBox::new(col as f32 * 130.0, row as f32 * 90.0, 100.0, 20.0);
                CandidateField::new(
                    format!("Field {page}-{row}-{col}"),
                    FieldType::Text,
                    anchor,
                    page,
                    DetectorSource::Heuristic,
                    conf,
                )
                .with_label_bbox(anchor)
            })
            .collect()
    })
}

fn fused(candidates: &[CandidateField]) -> Vec<FormField> {
    let pages: Vec<Page> = (0..3).map(|i| Page::new(i, 800, 800, Vec::new())).collect();
    fuse(
        candidates,
        &[],
        &pages,
        &ValidatorRegistry::default(),
        &Thresholds::default(),
    )
    .map(|(fields, _)| fields)
    .unwrap_or_default()
}

/// Heuristic candidates at arbitrary, possibly overlapping, positions.
fn crowded_candidates() -> impl Strategy<Value = Vec<CandidateField>> {
    prop::collection::vec(
        (0usize..2, 0f32..300.0, 0f32..300.0, 10f32..200.0, 8f32..30.0, 0f32..1.0),
        0..16,
    )
    .prop_map(|boxes| {
        boxes
            .into_iter()
            .enumerate()
            .map(|(i, (page, x, y, w, h, conf))| {
                CandidateField::new(
                    format!("Label {i}"),
                    FieldType::Text,
                    BBox::new(x, y, w, h),
                    page,
                    DetectorSource::Heuristic,
                    conf,
                )
            })
            .collect()
    })
}

fn date_input() -> impl Strategy<Value = String> {
    (1900i32..2100, 1u32..13, 1u32..29, 0usize..4).prop_map(|(y, m, d, style)| match style {
        0 => format!("{y:04}-{m:02}-{d:02}"),
        1 => format!("{d:02}/{m:02}/{y:04}"),
        2 => format!("{d}-{m}-{y}"),
        _ => format!("{y}/{m}/{d}"),
    })
}

fn any_answer() -> impl Strategy<Value = (FieldType, String)> {
    prop_oneof![
        (Just(FieldType::Text), "[ a-zA-Z0-9.,'-]{0,40}"),
        (Just(FieldType::Email), "[ ]?[a-zA-Z0-9._]{1,12}@[A-Za-z]{1,10}\\.[A-Za-z]{2,4}[ ]?"),
        (Just(FieldType::Phone), "\\+?[0-9 ()-]{5,22}"),
        (Just(FieldType::Number), "-?[0-9,]{1,12}(\\.[0-9]{1,4})?"),
        (Just(FieldType::Nric), "[STFG ][0-9 ]{7,9}[A-Za-z]"),
        (Just(FieldType::Date), date_input()),
    ]
}

// ── Properties ───────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn ordering_is_a_dense_permutation(candidates in spread_candidates()) {
        let fields = fused(&candidates);
        let labels_in: HashSet<String> = fields.iter().map(|f| f.label.clone()).collect();

        let ordered = order_fields(fields.clone(), 0.5);

        prop_assert_eq!(ordered.len(), fields.len());
        for (i, f) in ordered.iter().enumerate() {
            prop_assert_eq!(f.order_index, i);
            prop_assert_eq!(&f.id, &format!("f{i:03}"));
        }
        let labels_out: HashSet<String> = ordered.iter().map(|f| f.label.clone()).collect();
        prop_assert_eq!(labels_in, labels_out);
        prop_assert!(ordered.windows(2).all(|w| w[0].page_index <= w[1].page_index));
    }

    #[test]
    fn ordering_is_deterministic(candidates in spread_candidates()) {
        let fields = fused(&candidates);
        let once = order_fields(fields.clone(), 0.5);
        let twice = order_fields(fields, 0.5);
        prop_assert_eq!(&once, &twice);
        // Re-ordering an ordered list changes nothing.
        prop_assert_eq!(order_fields(once.clone(), 0.5), once);
    }

    #[test]
    fn ordering_ignores_input_order(candidates in spread_candidates()) {
        let fields = fused(&candidates);
        let mut reversed = fields.clone();
        reversed.reverse();
        let a: Vec<String> = order_fields(fields, 0.5).into_iter().map(|f| f.label).collect();
        let b: Vec<String> = order_fields(reversed, 0.5).into_iter().map(|f| f.label).collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn normalized_answers_are_fixed_points((field_type, raw) in any_answer()) {
        let registry = ValidatorRegistry::new(&ValidationSettings::default());
        if let Ok(normalized) = registry.validate(field_type, &raw, false) {
            let again = registry.validate(field_type, &normalized, false);
            prop_assert_eq!(again, Ok(normalized));
        }
    }

    #[test]
    fn valid_dates_always_normalize(raw in date_input()) {
        let registry = ValidatorRegistry::default();
        let normalized = registry.validate(FieldType::Date, &raw, true);
        prop_assert!(normalized.is_ok(), "rejected {}", raw);
        prop_assert_eq!(normalized.unwrap().len(), 10);
    }

    #[test]
    fn nearby_candidates_merge(
        x in 0f32..600.0,
        y in 0f32..600.0,
        dx in -20f32..20.0,
        dy in -20f32..20.0,
        radius in 30f32..60.0,
    ) {
        let a = BBox::new(x, y, 100.0, 20.0);
        let b = BBox::new(x + dx, y + dy, 100.0, 20.0);
        prop_assume!(a.center_distance(&b) < radius);

        let h = CandidateField::new("Name", FieldType::Text, a, 0, DetectorSource::Heuristic, 0.9);
        let l = CandidateField::new("Full name", FieldType::Text, b, 0, DetectorSource::Llm, 0.7);
        let t = Thresholds { proximity_radius_px: radius, ..Default::default() };
        let pages = vec![Page::new(0, 800, 800, Vec::new())];

        let (fields, stats) = fuse(&[h], &[l], &pages, &ValidatorRegistry::default(), &t)
            .expect("one field");
        prop_assert_eq!(stats.clusters, 1);
        prop_assert_eq!(fields.len(), 1);
        prop_assert_eq!(fields[0].anchor, a);
        prop_assert_eq!(&fields[0].label, "Full name");
    }

    #[test]
    fn single_source_fusion_keeps_every_candidate(candidates in crowded_candidates()) {
        let t = Thresholds::default();
        let pages: Vec<Page> = (0..2).map(|i| Page::new(i, 800, 800, Vec::new())).collect();
        let kept: Vec<&CandidateField> = candidates
            .iter()
            .filter(|c| c.confidence >= t.confidence_floor)
            .collect();

        match fuse(&candidates, &[], &pages, &ValidatorRegistry::default(), &t) {
            Ok((fields, stats)) => {
                prop_assert_eq!(stats.clusters, candidates.len());
                prop_assert_eq!(fields.len(), kept.len());
                for (f, c) in fields.iter().zip(&kept) {
                    prop_assert_eq!(&f.label, &c.label);
                    prop_assert_eq!(f.field_type, c.field_type);
                    prop_assert_eq!(f.anchor, c.anchor);
                    prop_assert_eq!(f.page_index, c.page_index);
                    prop_assert_eq!(&f.sources, &vec![DetectorSource::Heuristic]);
                }
            }
            Err(_) => prop_assert!(kept.is_empty()),
        }
    }

    #[test]
    fn distant_candidates_stay_apart(gap in 200f32..500.0) {
        let a = BBox::new(0.0, 0.0, 100.0, 20.0);
        let b = BBox::new(0.0, gap, 100.0, 20.0);
        let cands = vec![
            CandidateField::new("Name", FieldType::Text, a, 0, DetectorSource::Heuristic, 0.9),
            CandidateField::new("Email", FieldType::Email, b, 0, DetectorSource::Heuristic, 0.9),
        ];
        let pages = vec![Page::new(0, 800, 800, Vec::new())];
        let (fields, _) = fuse(&cands, &[], &pages, &ValidatorRegistry::default(), &Thresholds::default())
            .expect("fields");
        prop_assert_eq!(fields.len(), 2);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn heuristic_only_runs_are_idempotent(rows in prop::collection::vec((0usize..6, 0u32..3), 1..8)) {
        let labels = ["Name:", "Email:", "Phone:", "Address:", "Occupation:", "Nationality:"];
        let mut tokens = Vec::new();
        for (i, (label, col)) in rows.iter().enumerate() {
            let y = i as f32 * 30.0;
            let x = *col as f32 * 260.0;
            tokens.push(Token::new(labels[*label], 0, BBox::new(x, y, 80.0, 12.0), 0.9));
            tokens.push(Token::new("__________", 0, BBox::new(x + 90.0, y, 150.0, 12.0), 0.9));
        }
        let page = Page::new(0, 900, 400, tokens);
        let config = DetectionConfig::builder().llm_enabled(false).build().unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let a = rt.block_on(detect_fields(vec![page.clone()], None, &config)).unwrap();
        let b = rt.block_on(detect_fields(vec![page], None, &config)).unwrap();

        prop_assert_eq!(&a.fields, &b.fields);
        prop_assert_eq!(a.fields.len(), rows.len());
        for (i, f) in a.fields.iter().enumerate() {
            prop_assert_eq!(f.order_index, i);
        }
    }
}

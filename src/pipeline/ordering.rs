//! Reading order: page, then row band, then left to right.
//!
//! Fields on one page whose vertical centers differ by less than a tolerance
//! from a band's first member share that band, so a label printed a few pixels
//! lower than its neighbour still reads left to right. The tolerance scales
//! with the page's median field height.

use crate::field::FormField;
use std::collections::BTreeMap;

/// Sort fields into reading order and assign dense order indices and ids.
///
/// Ties on (page, band, x) keep the input order, so the result is total and
/// deterministic for any input.
pub fn order_fields(fields: Vec<FormField>, band_tolerance_ratio: f32) -> Vec<FormField> {
    let mut by_page: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, f) in fields.iter().enumerate() {
        by_page.entry(f.page_index).or_default().push(i);
    }

    let mut band_of = vec![0usize; fields.len()];
    for indices in by_page.values() {
        let tolerance = (band_tolerance_ratio * median_height(&fields, indices)).max(1.0);

        let mut by_y = indices.clone();
        by_y.sort_by(|&a, &b| {
            let (ya, yb) = (fields[a].reading_box().center_y(), fields[b].reading_box().center_y());
            ya.total_cmp(&yb).then(a.cmp(&b))
        });

        let mut band = 0usize;
        let mut band_top: Option<f32> = None;
        for i in by_y {
            let cy = fields[i].reading_box().center_y();
            match band_top {
                Some(top) if cy - top < tolerance => {}
                Some(_) => {
                    band += 1;
                    band_top = Some(cy);
                }
                None => band_top = Some(cy),
            }
            band_of[i] = band;
        }
    }

    let mut keyed: Vec<(usize, usize, f32, usize, FormField)> = fields
        .into_iter()
        .enumerate()
        .map(|(i, f)| (f.page_index, band_of[i], f.reading_box().x, i, f))
        .collect();
    keyed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.total_cmp(&b.2))
            .then(a.3.cmp(&b.3))
    });

    keyed
        .into_iter()
        .enumerate()
        .map(|(order, (_, _, _, _, mut f))| {
            f.order_index = order;
            f.id = format!("f{order:03}");
            f
        })
        .collect()
}

fn median_height(fields: &[FormField], indices: &[usize]) -> f32 {
    let mut heights: Vec<f32> = indices
        .iter()
        .map(|&i| fields[i].reading_box().height)
        .collect();
    if heights.is_empty() {
        return 0.0;
    }
    heights.sort_by(|a, b| a.total_cmp(b));
    let mid = heights.len() / 2;
    if heights.len() % 2 == 0 {
        (heights[mid - 1] + heights[mid]) / 2.0
    } else {
        heights[mid]
    }
}

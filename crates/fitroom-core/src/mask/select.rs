//! Candidate-mask selection for garment segmentation.

use super::morph;
use super::{Mask, MaskCandidate};

/// Tunables for [`select_mask`]. Defaults match the garment heuristics the
/// clothing pipeline was calibrated with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParams {
    /// Lowest coverage (area / image area) considered a plausible garment.
    pub min_coverage: f64,
    /// Highest coverage considered a plausible garment (above = likely background).
    pub max_coverage: f64,
    /// A non-chosen candidate may be merged only if its area is below this
    /// fraction of the chosen mask's area.
    pub merge_max_area_ratio: f64,
    /// ...and only if more than this fraction of it overlaps the mask merged so far.
    pub merge_min_overlap: f64,
    /// Structuring-element size of the closing step.
    pub close_kernel: usize,
    /// Structuring-element size of the final dilation.
    pub dilate_kernel: usize,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            min_coverage: 0.2,
            max_coverage: 0.7,
            merge_max_area_ratio: 0.5,
            merge_min_overlap: 0.5,
            close_kernel: 15,
            dilate_kernel: 10,
        }
    }
}

/// Reduce a batch of candidates to one foreground mask for a `width` x `height` image.
///
/// Returns `None` when there is nothing to choose from (no candidates, or none
/// matching the image grid); callers fall back to a full-frame mask. The result
/// depends only on the inputs, so re-running on the same batch is bit-identical.
pub fn select_mask(
    candidates: &[MaskCandidate],
    width: usize,
    height: usize,
    params: &SelectionParams,
) -> Option<Mask> {
    let usable: Vec<&Mask> = candidates
        .iter()
        .map(|c| &c.mask)
        .filter(|m| m.width() == width && m.height() == height)
        .collect();
    if usable.len() < candidates.len() {
        tracing::warn!(
            skipped = candidates.len() - usable.len(),
            width,
            height,
            "ignoring mask candidates that do not match the image grid"
        );
    }
    if usable.is_empty() || width * height == 0 {
        return None;
    }

    let areas: Vec<usize> = usable.iter().map(|m| m.area()).collect();
    let chosen = choose_index(&areas, width * height, params);
    let chosen_mask = usable[chosen];
    let chosen_area = areas[chosen];
    tracing::debug!(
        index = chosen,
        coverage = chosen_mask.coverage(),
        "selected mask candidate"
    );

    // Candidates are visited in input order; each one is measured against
    // everything merged before it, so a part attached only to an earlier merge joins too.
    let mut merged = chosen_mask.clone();
    for (idx, mask) in usable.iter().enumerate() {
        if idx == chosen || areas[idx] == 0 {
            continue;
        }
        let overlap = mask.intersection_area(&merged) as f64 / areas[idx] as f64;
        if (areas[idx] as f64) < chosen_area as f64 * params.merge_max_area_ratio
            && overlap > params.merge_min_overlap
        {
            tracing::debug!(index = idx, overlap, "merging overlapping mask candidate");
            merged.union_with(mask);
        }
    }

    let closed = morph::close(&merged, params.close_kernel);
    let smoothed = morph::dilate(&closed, params.dilate_kernel);
    tracing::debug!(coverage = smoothed.coverage(), "final mask coverage");
    Some(smoothed)
}

/// Largest candidate within the coverage band; otherwise the median-area one.
fn choose_index(areas: &[usize], total: usize, params: &SelectionParams) -> usize {
    let total = total as f64;
    let mut best: Option<usize> = None;
    for (idx, &area) in areas.iter().enumerate() {
        let coverage = area as f64 / total;
        if coverage < params.min_coverage || coverage > params.max_coverage {
            continue;
        }
        if best.map_or(true, |b| area > areas[b]) {
            best = Some(idx);
        }
    }
    if let Some(idx) = best {
        return idx;
    }

    tracing::warn!(
        "no mask within the {:.0}%-{:.0}% coverage band, using the median-sized candidate",
        params.min_coverage * 100.0,
        params.max_coverage * 100.0
    );
    let mut order: Vec<usize> = (0..areas.len()).collect();
    order.sort_by_key(|&i| areas[i]);
    order[order.len() / 2]
}

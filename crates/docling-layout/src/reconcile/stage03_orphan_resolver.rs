// Stage 03: Orphan Resolution
// Ids come from the page's IdAllocator; synthetic clusters never reuse a detector id.

use crate::types::{Cluster, ClusterLabel, IdAllocator, Provenance, TextCell};
use log::{debug, trace};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Configuration for Stage 03 (Orphan Resolution)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage03Config {
    /// Phase A: minimum IoU between cell and low-confidence cluster (default 0.05)
    pub rescue_iou_threshold: f64,
    /// Phase A: minimum confidence of the low-confidence cluster (default 0.05)
    pub rescue_min_confidence: f64,
    /// Phase A: `cell_area * factor` must exceed the low cluster's area (default 3.0)
    pub rescue_area_factor: f64,
    /// Phase B: IoU above which a low cluster lends its label (default 0.4)
    pub classify_iou_threshold: f64,
    /// Phase B: covered fraction of the cell above which a low cluster lends its label (default 0.2)
    pub classify_area_fraction: f64,
    /// Phase B: erosion for the containment test (default 3.0)
    pub containment_margin: f64,
    /// Line-number heuristic: runs longer than this suppress default clusters (default 75)
    pub line_number_run_threshold: usize,
    /// Line-number heuristic: only considered with more numeric orphans than this (default 2)
    pub line_number_min_values: usize,
}

impl Default for Stage03Config {
    #[inline]
    fn default() -> Self {
        Self {
            rescue_iou_threshold: 0.05,
            rescue_min_confidence: 0.05,
            rescue_area_factor: 3.0,
            classify_iou_threshold: 0.4,
            classify_area_fraction: 0.2,
            containment_margin: 3.0,
            line_number_run_threshold: 75,
            line_number_min_values: 2,
        }
    }
}

/// What orphan resolution did on one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanResolution {
    /// Orphan cells attached to a low-confidence cluster
    pub rescued_cells: usize,
    /// Low-confidence clusters promoted into the cluster list
    pub rescued_clusters: usize,
    /// Singleton default clusters created
    pub default_clusters: usize,
    /// Numbered-line column detected: default assignment skipped
    pub lines_detector: bool,
    /// Orphans intentionally left without a cluster, ascending
    pub unassigned: Vec<usize>,
}

/// Parse a cell text made only of ASCII digits, saturating at `u64::MAX`
fn numeric_value(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(trimmed.parse().unwrap_or(u64::MAX))
}

/// Lengths of the maximal runs of consecutive integers in `values`
///
/// Values are deduplicated and sorted first; a run breaks wherever the gap
/// between neighbours exceeds 1.
#[must_use]
pub fn consecutive_runs(values: &[u64]) -> Vec<usize> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut runs = Vec::new();
    let mut current = 0usize;
    let mut prev: Option<u64> = None;
    for value in sorted {
        match prev {
            Some(p) if value - p <= 1 => current += 1,
            Some(_) => {
                runs.push(current);
                current = 1;
            }
            None => current = 1,
        }
        prev = Some(value);
    }
    if current > 0 {
        runs.push(current);
    }
    runs
}

/// Stage 03: Orphan Resolver
///
/// Input: cleaned clusters, low-confidence clusters, orphan cells
/// Output: clusters extended with rescued low-confidence clusters and default
/// singleton clusters
///
/// Phase A (low-confidence rescue): each orphan goes to the low cluster with the
/// highest IoU among those with `IoU > rescue_iou_threshold`,
/// `confidence > rescue_min_confidence` and `cell_area * rescue_area_factor > area`.
/// Every low cluster that won at least one cell is cloned into the cluster list.
///
/// Phase B (default-to-text): orphans inside a Picture are left alone. If the
/// numeric orphans contain a run of consecutive values longer than
/// `line_number_run_threshold`, the page is a numbered-lines page and no default
/// cluster is created. Otherwise every orphan gets a singleton cluster labeled
/// after its best-overlapping low cluster (text-like labels only, else Text).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage03OrphanResolver {
    config: Stage03Config,
}

impl Stage03OrphanResolver {
    #[inline]
    #[must_use = "returns a new Stage03OrphanResolver instance"]
    pub fn new() -> Self {
        Self {
            config: Stage03Config::default(),
        }
    }

    #[inline]
    #[must_use = "returns a new Stage03OrphanResolver with custom config"]
    pub const fn with_config(config: Stage03Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Stage03Config {
        &self.config
    }

    /// Resolve `orphans` (ascending cell indices) against `low`
    pub fn process(
        &self,
        clusters: &mut Vec<Cluster>,
        low: &[Cluster],
        cells: &[TextCell],
        orphans: &[usize],
        ids: &mut IdAllocator,
    ) -> OrphanResolution {
        let mut outcome = OrphanResolution::default();
        let input_count = clusters.len();

        let remaining = self.rescue_from_low_confidence(clusters, low, cells, orphans, ids, &mut outcome);
        self.assign_defaults(clusters, low, cells, &remaining, ids, &mut outcome);

        debug!(
            "{}: {} orphans, {} rescued into {} low-confidence clusters, {} default clusters, lines_detector={}, {} left unassigned ({} -> {} clusters)",
            self.stage_name(),
            orphans.len(),
            outcome.rescued_cells,
            outcome.rescued_clusters,
            outcome.default_clusters,
            outcome.lines_detector,
            outcome.unassigned.len(),
            input_count,
            clusters.len()
        );

        outcome
    }

    /// Phase A; returns the orphans that found no low-confidence cluster
    fn rescue_from_low_confidence(
        &self,
        clusters: &mut Vec<Cluster>,
        low: &[Cluster],
        cells: &[TextCell],
        orphans: &[usize],
        ids: &mut IdAllocator,
        outcome: &mut OrphanResolution,
    ) -> Vec<usize> {
        let mut won: Vec<Vec<usize>> = vec![Vec::new(); low.len()];
        let mut remaining = Vec::new();

        for &cell_id in orphans {
            let cell = &cells[cell_id].bbox;
            let cell_area = cell.area();

            let best = low
                .iter()
                .enumerate()
                .filter(|(_, candidate)| {
                    candidate.confidence > self.config.rescue_min_confidence
                        && cell_area * self.config.rescue_area_factor > candidate.bbox.area()
                })
                .map(|(pos, candidate)| (pos, cell.iou(&candidate.bbox)))
                .filter(|&(_, iou)| iou > self.config.rescue_iou_threshold)
                .max_by_key(|&(pos, iou)| (OrderedFloat(iou), Reverse(pos)));

            match best {
                Some((pos, iou)) => {
                    trace!(
                        "  Orphan cell[{}] rescued by low-confidence cluster ID={} ({}), iou={:.3}",
                        cell_id,
                        low[pos].id,
                        low[pos].label,
                        iou
                    );
                    won[pos].push(cell_id);
                    outcome.rescued_cells += 1;
                }
                None => remaining.push(cell_id),
            }
        }

        for (source, cell_ids) in low.iter().zip(won) {
            if cell_ids.is_empty() {
                continue;
            }
            let mut rescued = Cluster::new(
                ids.allocate(),
                source.label.clone(),
                source.bbox,
                source.confidence,
                Provenance::ModelLowConfRescue,
            );
            rescued.extend_cells(cell_ids);
            clusters.push(rescued);
            outcome.rescued_clusters += 1;
        }

        remaining
    }

    /// Phase B
    fn assign_defaults(
        &self,
        clusters: &mut Vec<Cluster>,
        low: &[Cluster],
        cells: &[TextCell],
        remaining: &[usize],
        ids: &mut IdAllocator,
        outcome: &mut OrphanResolution,
    ) {
        let (in_picture, candidates): (Vec<usize>, Vec<usize>) =
            remaining.iter().partition(|&&cell_id| {
                clusters
                    .iter()
                    .any(|c| c.label.is_picture() && c.bbox.contains(&cells[cell_id].bbox))
            });
        if !in_picture.is_empty() {
            trace!("  {} orphan cells inside pictures left unassigned", in_picture.len());
        }

        outcome.lines_detector = self.detect_line_numbers(candidates.iter().map(|&id| &cells[id]));
        if outcome.lines_detector {
            debug!(
                "{}: numbered-lines column detected, {} orphans not assigned",
                self.stage_name(),
                candidates.len()
            );
            outcome.unassigned = remaining.to_vec();
            return;
        }
        outcome.unassigned = in_picture;

        for cell_id in candidates {
            let cell = &cells[cell_id];
            let label = self.classify(cell, low);
            trace!("  Orphan cell[{}] -> default {} cluster", cell_id, label);
            clusters.push(Cluster::orphan(ids.allocate(), label, cell));
            outcome.default_clusters += 1;
        }
    }

    /// Numbered-lines heuristic over the numeric cell texts
    #[must_use]
    pub fn detect_line_numbers<'a>(&self, cells: impl IntoIterator<Item = &'a TextCell>) -> bool {
        let values: Vec<u64> = cells
            .into_iter()
            .filter_map(|cell| numeric_value(&cell.text))
            .collect();
        if values.len() <= self.config.line_number_min_values {
            return false;
        }

        consecutive_runs(&values)
            .into_iter()
            .any(|run| run > self.config.line_number_run_threshold)
    }

    /// Label for a default cluster: best-overlapping low cluster, text-like only
    #[must_use]
    pub fn classify(&self, cell: &TextCell, low: &[Cluster]) -> ClusterLabel {
        let bbox = &cell.bbox;
        low.iter()
            .enumerate()
            .filter(|(_, candidate)| {
                candidate
                    .bbox
                    .contains_with_margin(bbox, self.config.containment_margin)
                    || bbox.iou(&candidate.bbox) > self.config.classify_iou_threshold
                    || bbox.intersection_over_self(&candidate.bbox)
                        > self.config.classify_area_fraction
            })
            .max_by_key(|&(pos, candidate)| {
                (
                    OrderedFloat(bbox.intersection_over_self(&candidate.bbox)),
                    Reverse(pos),
                )
            })
            .map(|(_, candidate)| &candidate.label)
            .filter(|label| label.is_text_like())
            .cloned()
            .unwrap_or_default()
    }

    /// Get stage name for logging
    #[inline]
    #[must_use = "returns the stage name for logging"]
    pub const fn stage_name(&self) -> &'static str {
        "Stage03_OrphanResolver"
    }
}

// Stage 02: Cluster Cleanup
// Pair scans go through the R-tree; every candidate is re-checked with the exact predicate.
#![allow(clippy::module_name_repetitions)]

use crate::geometry::BBox;
use crate::spatial::SpatialIndex;
use crate::types::{Cluster, ClusterLabel};
use log::{debug, trace};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};

/// Boxes further apart than this cannot reach a positive `+1`-convention IoU
const IOU_REACH: f64 = 1.0;

/// Configuration for Stage 02 (Cluster Cleanup)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage02Config {
    /// IoU above which two clusters are duplicates (default 0.5)
    pub duplicate_iou_threshold: f64,
    /// Erosion applied to the contained box in containment tests (default 3.0)
    pub containment_margin: f64,
    /// Tables with fewer member cells are degenerate (default 2)
    pub min_table_cells: usize,
    /// Absorb clusters fully contained in another (default true)
    pub remove_merge_artifacts: bool,
    /// Delete Text clusters sitting on a Picture or Table (default true)
    pub remove_text_in_picture_or_table: bool,
    /// Delete Tables with fewer than `min_table_cells` cells (default true)
    pub remove_degenerate_tables: bool,
}

impl Default for Stage02Config {
    #[inline]
    fn default() -> Self {
        Self {
            duplicate_iou_threshold: 0.5,
            containment_margin: 3.0,
            min_table_cells: 2,
            remove_merge_artifacts: true,
            remove_text_in_picture_or_table: true,
            remove_degenerate_tables: true,
        }
    }
}

/// Which rule families a cleanup invocation runs
///
/// Combined with the config toggles: a pass runs only when both enable it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupPasses {
    pub duplicates: bool,
    pub merge_artifacts: bool,
    pub text_in_picture_or_table: bool,
    pub degenerate_tables: bool,
}

impl CleanupPasses {
    /// Cleanup right after cell association
    ///
    /// Merge artifacts only arise from the connectivity merge, so nested
    /// detections are left to the duplicate rule here.
    pub const INITIAL: Self = Self {
        duplicates: true,
        merge_artifacts: false,
        text_in_picture_or_table: true,
        degenerate_tables: true,
    };

    /// Cleanup after orphan resolution and connectivity merge
    pub const POST_MERGE: Self = Self {
        duplicates: true,
        merge_artifacts: true,
        text_in_picture_or_table: false,
        degenerate_tables: false,
    };

    /// Re-check after bbox adaptation, which can move boxes onto each other
    pub const FINAL: Self = Self {
        duplicates: true,
        merge_artifacts: false,
        text_in_picture_or_table: false,
        degenerate_tables: false,
    };
}

/// Per-pass deletion counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub duplicates: usize,
    pub merge_artifacts: usize,
    pub text_in_picture_or_table: usize,
    pub degenerate_tables: usize,
    /// Non-Picture clusters left without cells
    pub emptied: usize,
}

impl CleanupReport {
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.duplicates
            + self.merge_artifacts
            + self.text_in_picture_or_table
            + self.degenerate_tables
            + self.emptied
    }
}

/// Clusters marked for deletion in one pass, each with the clusters that caused it
///
/// Marks are collected against an unchanged cluster list and applied once, so a
/// cluster deleted early in a pass still takes part in later comparisons.
#[derive(Debug, Clone, Default)]
struct DeletionSet {
    dominators: Vec<Option<Vec<usize>>>,
}

impl DeletionSet {
    fn new(len: usize) -> Self {
        Self {
            dominators: vec![None; len],
        }
    }

    /// Mark `pos` for deletion; `dominator` receives its cells if it survives
    fn mark(&mut self, pos: usize, dominator: Option<usize>) {
        let entry = self.dominators[pos].get_or_insert_with(Vec::new);
        if let Some(dom) = dominator {
            if !entry.contains(&dom) {
                entry.push(dom);
            }
        }
    }

    fn is_marked(&self, pos: usize) -> bool {
        self.dominators[pos].is_some()
    }

    fn count(&self) -> usize {
        self.dominators.iter().filter(|d| d.is_some()).count()
    }

    /// Surviving cluster that absorbs the cells of deleted `pos`
    ///
    /// Walks dominators of dominators when every direct dominator is deleted too.
    fn absorber(&self, pos: usize, clusters: &[Cluster]) -> Option<usize> {
        let mut visited = vec![false; clusters.len()];
        visited[pos] = true;
        let mut frontier: Vec<usize> = self.dominators[pos].clone().unwrap_or_default();

        while !frontier.is_empty() {
            frontier.retain(|&p| !std::mem::replace(&mut visited[p], true));

            let survivor = frontier
                .iter()
                .copied()
                .filter(|&p| !self.is_marked(p))
                .max_by_key(|&p| (OrderedFloat(clusters[p].confidence), Reverse(p)));
            if survivor.is_some() {
                return survivor;
            }

            frontier = frontier
                .iter()
                .filter_map(|&p| self.dominators[p].as_ref())
                .flatten()
                .copied()
                .filter(|&p| !visited[p])
                .collect();
        }
        None
    }

    /// Move cells to absorbers, then drop every marked cluster
    fn apply(self, clusters: &mut Vec<Cluster>, pass: &str) -> usize {
        let deleted = self.count();
        if deleted == 0 {
            return 0;
        }

        for pos in 0..clusters.len() {
            if !self.is_marked(pos) {
                continue;
            }
            let cells = std::mem::take(&mut clusters[pos].cell_ids);
            match self.absorber(pos, clusters) {
                Some(target) => {
                    trace!(
                        "  {}: cluster ID={} ({}) absorbed into ID={} with {} cells",
                        pass,
                        clusters[pos].id,
                        clusters[pos].label,
                        clusters[target].id,
                        cells.len()
                    );
                    clusters[target].extend_cells(cells);
                }
                None => trace!(
                    "  {}: cluster ID={} ({}) removed, {} cells released",
                    pass,
                    clusters[pos].id,
                    clusters[pos].label,
                    cells.len()
                ),
            }
        }

        let mut pos = 0;
        clusters.retain(|_| {
            let keep = !self.is_marked(pos);
            pos += 1;
            keep
        });
        deleted
    }
}

/// Stage 02: Cluster Cleanup
///
/// Input: clusters with assigned cells
/// Output: clusters without duplicates, merge artifacts, text sitting on
/// pictures/tables, degenerate tables or (non-Picture) empty clusters
///
/// Rule families:
/// - Duplicate-by-confidence: for a pair with different confidence, the lower one
///   is deleted when `IoU > duplicate_iou_threshold` or it is contained (after
///   erosion by `containment_margin`) in the higher one
/// - Merge artifacts: a cluster fully inside another of no lower confidence is
///   absorbed by it
/// - Text on Picture/Table: a Text cluster overlapping (IoU) or contained in a
///   Picture or Table is absorbed by it
/// - Degenerate tables: Tables with fewer than `min_table_cells` cells are deleted
///   and their cells released
///
/// Each pass computes its deletion set from the list as it stood when the pass
/// started. Deleted clusters hand their cells to the highest-confidence surviving
/// cluster that caused the deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage02ClusterCleanup {
    config: Stage02Config,
}

impl Stage02ClusterCleanup {
    #[inline]
    #[must_use = "returns a new Stage02ClusterCleanup instance"]
    pub fn new() -> Self {
        Self {
            config: Stage02Config::default(),
        }
    }

    #[inline]
    #[must_use = "returns a new Stage02ClusterCleanup with custom config"]
    pub const fn with_config(config: Stage02Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Stage02Config {
        &self.config
    }

    /// Run the enabled passes in order, then drop empty non-Picture clusters
    pub fn process(&self, clusters: &mut Vec<Cluster>, passes: CleanupPasses) -> CleanupReport {
        let input_count = clusters.len();
        let mut report = CleanupReport::default();

        if passes.duplicates {
            let marks = self.find_duplicates(clusters);
            report.duplicates = marks.apply(clusters, "duplicates");
        }
        if passes.merge_artifacts && self.config.remove_merge_artifacts {
            let marks = self.find_merge_artifacts(clusters);
            report.merge_artifacts = marks.apply(clusters, "merge_artifacts");
        }
        if passes.text_in_picture_or_table && self.config.remove_text_in_picture_or_table {
            let marks = self.find_text_in_picture_or_table(clusters);
            report.text_in_picture_or_table = marks.apply(clusters, "text_in_picture_or_table");
        }
        if passes.degenerate_tables && self.config.remove_degenerate_tables {
            let marks = self.find_degenerate_tables(clusters);
            report.degenerate_tables = marks.apply(clusters, "degenerate_tables");
        }

        let before = clusters.len();
        clusters.retain(|c| !c.is_removable_when_empty());
        report.emptied = before - clusters.len();

        debug!(
            "{}: {} -> {} clusters (duplicates={}, merge_artifacts={}, text_in_picture_or_table={}, degenerate_tables={}, emptied={})",
            self.stage_name(),
            input_count,
            clusters.len(),
            report.duplicates,
            report.merge_artifacts,
            report.text_in_picture_or_table,
            report.degenerate_tables,
            report.emptied
        );

        report
    }

    /// True when `lower` duplicates `higher`
    #[inline]
    fn is_duplicate(&self, lower: &BBox, higher: &BBox) -> bool {
        higher.iou(lower) > self.config.duplicate_iou_threshold
            || higher.contains_with_margin(lower, self.config.containment_margin)
    }

    fn find_duplicates(&self, clusters: &[Cluster]) -> DeletionSet {
        let index = SpatialIndex::new(clusters.iter().map(|c| &c.bbox));
        let mut marks = DeletionSet::new(clusters.len());

        for (i, a) in clusters.iter().enumerate() {
            for j in index.candidates(&a.bbox.dilated(IOU_REACH)) {
                if j <= i {
                    continue;
                }
                let b = &clusters[j];
                let (lower, higher) = match a.confidence.total_cmp(&b.confidence) {
                    Ordering::Equal => continue,
                    Ordering::Less => (i, j),
                    Ordering::Greater => (j, i),
                };
                if self.is_duplicate(&clusters[lower].bbox, &clusters[higher].bbox) {
                    marks.mark(lower, Some(higher));
                }
            }
        }

        marks
    }

    fn find_merge_artifacts(&self, clusters: &[Cluster]) -> DeletionSet {
        let index = SpatialIndex::new(clusters.iter().map(|c| &c.bbox));
        let mut marks = DeletionSet::new(clusters.len());

        for (inner, a) in clusters.iter().enumerate() {
            for outer in index.candidates(&a.bbox) {
                if outer == inner {
                    continue;
                }
                let b = &clusters[outer];
                if !b.bbox.contains(&a.bbox) || a.confidence > b.confidence {
                    continue;
                }
                // Identical boxes contain each other: only the later one is the artifact
                if a.bbox.contains(&b.bbox) && inner < outer {
                    continue;
                }
                marks.mark(inner, Some(outer));
            }
        }

        marks
    }

    fn find_text_in_picture_or_table(&self, clusters: &[Cluster]) -> DeletionSet {
        let index = SpatialIndex::new(clusters.iter().map(|c| &c.bbox));
        let mut marks = DeletionSet::new(clusters.len());

        for (i, text) in clusters.iter().enumerate() {
            if text.label != ClusterLabel::Text {
                continue;
            }
            for j in index.candidates(&text.bbox.dilated(IOU_REACH)) {
                let region = &clusters[j];
                if !(region.label.is_picture() || region.label.is_table()) {
                    continue;
                }
                if self.is_duplicate(&text.bbox, &region.bbox) {
                    marks.mark(i, Some(j));
                }
            }
        }

        marks
    }

    fn find_degenerate_tables(&self, clusters: &[Cluster]) -> DeletionSet {
        let mut marks = DeletionSet::new(clusters.len());
        for (i, cluster) in clusters.iter().enumerate() {
            if cluster.label.is_table() && cluster.cell_ids.len() < self.config.min_table_cells {
                marks.mark(i, None);
            }
        }
        marks
    }

    /// Get stage name for logging
    #[inline]
    #[must_use = "returns the stage name for logging"]
    pub const fn stage_name(&self) -> &'static str {
        "Stage02_ClusterCleanup"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterLabel, Provenance};

    fn cluster(id: usize, label: ClusterLabel, bbox: BBox, confidence: f64, cells: &[usize]) -> Cluster {
        let mut c = Cluster::new(id, label, bbox, confidence, Provenance::ModelPrimary);
        c.extend_cells(cells.iter().copied());
        c
    }

    fn ids(clusters: &[Cluster]) -> Vec<usize> {
        clusters.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_duplicate_lower_confidence_removed() {
        let bbox = BBox::new(0.0, 0.0, 100.0, 20.0);
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, bbox, 0.4, &[1]),
            cluster(1, ClusterLabel::Text, bbox, 0.9, &[0]),
        ];

        let report = Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::INITIAL);
        assert_eq!(report.duplicates, 1);
        assert_eq!(ids(&clusters), vec![1]);
        // Cells of the duplicate move to the survivor
        assert_eq!(clusters[0].cell_ids, vec![0, 1]);
    }

    #[test]
    fn test_equal_confidence_is_not_duplicate() {
        let bbox = BBox::new(0.0, 0.0, 100.0, 20.0);
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, bbox, 0.7, &[0]),
            cluster(1, ClusterLabel::Caption, BBox::new(0.0, 0.0, 100.0, 21.0), 0.7, &[1]),
        ];
        let passes = CleanupPasses {
            merge_artifacts: false,
            ..CleanupPasses::INITIAL
        };
        let report = Stage02ClusterCleanup::new().process(&mut clusters, passes);
        assert_eq!(report.duplicates, 0);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_duplicate_picture_removed_even_without_cells() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Picture, BBox::new(0.0, 0.0, 50.0, 50.0), 0.8, &[]),
            cluster(1, ClusterLabel::Picture, BBox::new(1.0, 1.0, 49.0, 49.0), 0.3, &[]),
        ];
        Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::INITIAL);
        assert_eq!(ids(&clusters), vec![0]);
    }

    #[test]
    fn test_contained_lower_confidence_removed() {
        // IoU is small but the small box sits inside the big one
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 200.0, 200.0), 0.9, &[0]),
            cluster(1, ClusterLabel::Text, BBox::new(10.0, 10.0, 30.0, 30.0), 0.5, &[1]),
        ];
        let passes = CleanupPasses {
            duplicates: true,
            merge_artifacts: false,
            text_in_picture_or_table: false,
            degenerate_tables: false,
        };
        let report = Stage02ClusterCleanup::new().process(&mut clusters, passes);
        assert_eq!(report.duplicates, 1);
        assert_eq!(clusters[0].cell_ids, vec![0, 1]);
    }

    #[test]
    fn test_deletions_use_snapshot() {
        // B (0.5) duplicates A (0.9); C (0.2) duplicates B only.
        // C is still removed although B is deleted in the same pass,
        // and its cells go to A through B.
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 100.0, 10.0), 0.9, &[0]),
            cluster(1, ClusterLabel::Text, BBox::new(10.0, 0.0, 110.0, 10.0), 0.5, &[1]),
            cluster(2, ClusterLabel::Text, BBox::new(40.0, 0.0, 140.0, 10.0), 0.2, &[2]),
        ];
        let passes = CleanupPasses {
            duplicates: true,
            merge_artifacts: false,
            text_in_picture_or_table: false,
            degenerate_tables: false,
        };
        let report = Stage02ClusterCleanup::new().process(&mut clusters, passes);
        assert_eq!(report.duplicates, 2);
        assert_eq!(ids(&clusters), vec![0]);
        assert_eq!(clusters[0].cell_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_merge_artifact_absorbed() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 100.0, 50.0), -1.0, &[0, 1]),
            cluster(1, ClusterLabel::Text, BBox::new(10.0, 10.0, 20.0, 20.0), -1.0, &[2]),
        ];
        let report = Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::POST_MERGE);
        assert_eq!(report.merge_artifacts, 1);
        assert_eq!(ids(&clusters), vec![0]);
        assert_eq!(clusters[0].cell_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_initial_keeps_nested_confident_detection() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 100.0, 100.0), 0.5, &[1]),
            cluster(1, ClusterLabel::SectionHeader, BBox::new(8.0, 78.0, 62.0, 92.0), 0.95, &[0]),
        ];
        let report = Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::INITIAL);
        assert_eq!(report.total(), 0);
        assert_eq!(ids(&clusters), vec![0, 1]);
    }

    #[test]
    fn test_merge_artifact_spares_more_confident_inner() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 100.0, 100.0), -1.0, &[1]),
            cluster(1, ClusterLabel::Caption, BBox::new(10.0, 10.0, 50.0, 20.0), 0.8, &[0]),
        ];
        let passes = CleanupPasses {
            duplicates: false,
            ..CleanupPasses::POST_MERGE
        };
        let report = Stage02ClusterCleanup::new().process(&mut clusters, passes);
        assert_eq!(report.merge_artifacts, 0);
        assert_eq!(ids(&clusters), vec![0, 1]);
    }

    #[test]
    fn test_final_runs_duplicates_only() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 100.0, 50.0), -1.0, &[0]),
            cluster(1, ClusterLabel::Text, BBox::new(10.0, 10.0, 20.0, 20.0), -1.0, &[1]),
            cluster(2, ClusterLabel::Table, BBox::new(200.0, 0.0, 300.0, 100.0), 0.9, &[2]),
            cluster(3, ClusterLabel::Text, BBox::new(0.0, 60.0, 100.0, 80.0), 0.7, &[3]),
            cluster(4, ClusterLabel::Text, BBox::new(20.0, 62.0, 60.0, 70.0), 0.4, &[4]),
        ];
        let report = Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::FINAL);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.total(), 1);
        assert_eq!(ids(&clusters), vec![0, 1, 2, 3]);
        assert_eq!(clusters[3].cell_ids, vec![3, 4]);
    }

    #[test]
    fn test_identical_boxes_keep_first() {
        let bbox = BBox::new(0.0, 0.0, 10.0, 10.0);
        let mut clusters = vec![
            cluster(4, ClusterLabel::Text, bbox, -1.0, &[0]),
            cluster(7, ClusterLabel::Text, bbox, -1.0, &[1]),
        ];
        Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::POST_MERGE);
        assert_eq!(ids(&clusters), vec![4]);
        assert_eq!(clusters[0].cell_ids, vec![0, 1]);
    }

    #[test]
    fn test_text_on_table_absorbed() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Table, BBox::new(0.0, 0.0, 100.0, 100.0), 0.6, &[0, 1]),
            cluster(1, ClusterLabel::Text, BBox::new(-2.0, 40.0, 60.0, 60.0), 0.95, &[2]),
        ];
        let passes = CleanupPasses {
            duplicates: false,
            merge_artifacts: false,
            text_in_picture_or_table: true,
            degenerate_tables: false,
        };
        let report = Stage02ClusterCleanup::new().process(&mut clusters, passes);
        assert_eq!(report.text_in_picture_or_table, 1);
        assert_eq!(ids(&clusters), vec![0]);
        assert_eq!(clusters[0].cell_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_degenerate_table_releases_cells() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Table, BBox::new(0.0, 0.0, 100.0, 100.0), 0.9, &[0]),
            cluster(1, ClusterLabel::Text, BBox::new(200.0, 0.0, 300.0, 10.0), 0.9, &[1]),
        ];
        let report = Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::INITIAL);
        assert_eq!(report.degenerate_tables, 1);
        assert_eq!(ids(&clusters), vec![1]);
    }

    #[test]
    fn test_toggles_disable_passes() {
        let config = Stage02Config {
            remove_degenerate_tables: false,
            ..Stage02Config::default()
        };
        let mut clusters = vec![cluster(0, ClusterLabel::Table, BBox::new(0.0, 0.0, 100.0, 100.0), 0.9, &[0])];
        let report = Stage02ClusterCleanup::with_config(config).process(&mut clusters, CleanupPasses::INITIAL);
        assert_eq!(report.total(), 0);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn test_empty_clusters_dropped_except_pictures() {
        let mut clusters = vec![
            cluster(0, ClusterLabel::Text, BBox::new(0.0, 0.0, 10.0, 10.0), 0.9, &[]),
            cluster(1, ClusterLabel::Picture, BBox::new(100.0, 100.0, 150.0, 150.0), 0.9, &[]),
        ];
        let report = Stage02ClusterCleanup::new().process(&mut clusters, CleanupPasses::INITIAL);
        assert_eq!(report.emptied, 1);
        assert_eq!(ids(&clusters), vec![1]);
    }
}

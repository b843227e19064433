/// Layout Reconciliation Orchestrator
///
/// Runs the stages over one page:
///
/// ```text
/// validate → Stage01 assign → Stage02 cleanup (initial) → resolve ambiguous cells
///   → orphan cells → Stage03 rescue/default → Stage04 connectivity merge
///   → Stage02 cleanup (post-merge) → resolve ambiguous cells → coverage sweep
///   → Stage05 bbox adaptation ⇄ Stage02 cleanup (final, until nothing is removed)
///   → Stage06 reading order
/// ```
///
/// Every call owns its page; the reconciler itself is immutable and can be shared
/// across threads processing different pages.
use crate::error::{ReconcileError, Result};
use crate::reconcile::{
    stage01_cell_assigner::{CellAssignment, Stage01Config},
    stage02_cluster_cleanup::{CleanupPasses, Stage02Config},
    stage03_orphan_resolver::Stage03Config,
    stage04_connectivity_merge::Stage04Config,
    stage05_bbox_adapter::Stage05Config,
    stage06_reading_order::Stage06Config,
    Stage01CellAssigner, Stage02ClusterCleanup, Stage03OrphanResolver, Stage04ConnectivityMerge,
    Stage05BboxAdapter, Stage06ReadingOrder,
};
use crate::types::{
    Cluster, ClusterLabel, IdAllocator, PageInput, Prediction, Provenance, ReconciledPage, TextCell,
};
use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Configuration for the whole reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub cell_assignment: Stage01Config,
    pub cleanup: Stage02Config,
    pub orphans: Stage03Config,
    pub merge: Stage04Config,
    pub bbox: Stage05Config,
    pub reading_order: Stage06Config,
    /// Give leftover non-blank cells a default cluster after the post-merge cleanup (default true)
    pub coverage_sweep: bool,
    /// Log per-stage timings at debug level (default false)
    pub micro_profile: bool,
}

impl Default for ReconcileConfig {
    #[inline]
    fn default() -> Self {
        Self {
            cell_assignment: Stage01Config::default(),
            cleanup: Stage02Config::default(),
            orphans: Stage03Config::default(),
            merge: Stage04Config::default(),
            bbox: Stage05Config::default(),
            reading_order: Stage06Config::default(),
            coverage_sweep: true,
            micro_profile: false,
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ReconcileError::InvalidConfig {
            reason: format!("{name} must be within [0, 1], got {value}"),
        })
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ReconcileError::InvalidConfig {
            reason: format!("{name} must be a finite value >= 0, got {value}"),
        })
    }
}

impl ReconcileConfig {
    /// Parse a (partial) JSON configuration; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Json`] on malformed JSON, [`ReconcileError::InvalidConfig`]
    /// when a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Io`] if the file cannot be read, otherwise as
    /// [`ReconcileConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every threshold and margin
    ///
    /// # Errors
    ///
    /// [`ReconcileError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        check_fraction(
            "cell_assignment.min_intersect_fraction",
            self.cell_assignment.min_intersect_fraction,
        )?;
        check_non_negative(
            "cell_assignment.containment_margin",
            self.cell_assignment.containment_margin,
        )?;

        check_fraction(
            "cleanup.duplicate_iou_threshold",
            self.cleanup.duplicate_iou_threshold,
        )?;
        check_non_negative("cleanup.containment_margin", self.cleanup.containment_margin)?;

        check_fraction("orphans.rescue_iou_threshold", self.orphans.rescue_iou_threshold)?;
        check_fraction("orphans.rescue_min_confidence", self.orphans.rescue_min_confidence)?;
        check_non_negative("orphans.rescue_area_factor", self.orphans.rescue_area_factor)?;
        check_fraction(
            "orphans.classify_iou_threshold",
            self.orphans.classify_iou_threshold,
        )?;
        check_fraction(
            "orphans.classify_area_fraction",
            self.orphans.classify_area_fraction,
        )?;
        check_non_negative("orphans.containment_margin", self.orphans.containment_margin)?;
        if self.orphans.line_number_run_threshold == 0 {
            return Err(ReconcileError::InvalidConfig {
                reason: "orphans.line_number_run_threshold must be >= 1".to_string(),
            });
        }

        check_non_negative("merge.dilation", self.merge.dilation)?;
        check_fraction("bbox.table_spurious_fraction", self.bbox.table_spurious_fraction)?;
        check_fraction(
            "reading_order.same_line_overlap",
            self.reading_order.same_line_overlap,
        )?;

        Ok(())
    }
}

/// Builder for [`ReconcileConfig`]
///
/// # Examples
///
/// ```
/// use docling_layout::ReconcileConfigBuilder;
///
/// # fn main() -> docling_layout::Result<()> {
/// let config = ReconcileConfigBuilder::new()
///     .merge_dilation(1.5)
///     .line_number_run_threshold(120)
///     .build()?;
/// assert_eq!(config.merge.dilation, 1.5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReconcileConfigBuilder {
    config: ReconcileConfig,
}

impl ReconcileConfigBuilder {
    /// Create a new config builder with defaults
    #[inline]
    #[must_use = "returns a new builder with default settings"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum covered fraction of a cell for geometric association (default 0.2)
    #[must_use = "returns the updated builder"]
    pub const fn min_intersect_fraction(mut self, fraction: f64) -> Self {
        self.config.cell_assignment.min_intersect_fraction = fraction;
        self
    }

    /// Erosion margin used by every containment test (default 3.0)
    #[must_use = "returns the updated builder"]
    pub const fn containment_margin(mut self, margin: f64) -> Self {
        self.config.cell_assignment.containment_margin = margin;
        self.config.cleanup.containment_margin = margin;
        self.config.orphans.containment_margin = margin;
        self
    }

    /// IoU above which two clusters are duplicates (default 0.5)
    #[must_use = "returns the updated builder"]
    pub const fn duplicate_iou_threshold(mut self, threshold: f64) -> Self {
        self.config.cleanup.duplicate_iou_threshold = threshold;
        self
    }

    #[must_use = "returns the updated builder"]
    pub const fn remove_merge_artifacts(mut self, enabled: bool) -> Self {
        self.config.cleanup.remove_merge_artifacts = enabled;
        self
    }

    #[must_use = "returns the updated builder"]
    pub const fn remove_text_in_picture_or_table(mut self, enabled: bool) -> Self {
        self.config.cleanup.remove_text_in_picture_or_table = enabled;
        self
    }

    #[must_use = "returns the updated builder"]
    pub const fn remove_degenerate_tables(mut self, enabled: bool) -> Self {
        self.config.cleanup.remove_degenerate_tables = enabled;
        self
    }

    /// Consecutive-number run length that marks a numbered-lines page (default 75)
    #[must_use = "returns the updated builder"]
    pub const fn line_number_run_threshold(mut self, threshold: usize) -> Self {
        self.config.orphans.line_number_run_threshold = threshold;
        self
    }

    /// Dilation for the connectivity merge (default 2.0)
    #[must_use = "returns the updated builder"]
    pub const fn merge_dilation(mut self, dilation: f64) -> Self {
        self.config.merge.dilation = dilation;
        self
    }

    /// Covered fraction that makes a foreign cell spurious inside a table (default 0.3)
    #[must_use = "returns the updated builder"]
    pub const fn table_spurious_fraction(mut self, fraction: f64) -> Self {
        self.config.bbox.table_spurious_fraction = fraction;
        self
    }

    /// Vertical overlap at which cells join with a space (default 0.5)
    #[must_use = "returns the updated builder"]
    pub const fn same_line_overlap(mut self, fraction: f64) -> Self {
        self.config.reading_order.same_line_overlap = fraction;
        self
    }

    #[must_use = "returns the updated builder"]
    pub const fn coverage_sweep(mut self, enabled: bool) -> Self {
        self.config.coverage_sweep = enabled;
        self
    }

    #[must_use = "returns the updated builder"]
    pub const fn micro_profile(mut self, enabled: bool) -> Self {
        self.config.micro_profile = enabled;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// [`ReconcileError::InvalidConfig`] if a value is out of range.
    pub fn build(self) -> Result<ReconcileConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Run `f`, logging its duration when profiling is on
fn timed_operation<T, F: FnOnce() -> T>(micro_profile: bool, label: &str, f: F) -> T {
    if micro_profile {
        let t_start = Instant::now();
        let result = f();
        debug!(
            "[MICRO] {}: {:.3} ms",
            label,
            t_start.elapsed().as_secs_f64() * 1000.0
        );
        result
    } else {
        f()
    }
}

/// Reject pages the stages cannot process
///
/// # Errors
///
/// The first malformed record found, see [`ReconcileError::is_malformed_input`].
pub fn validate_page(page: &PageInput) -> Result<()> {
    let cell_count = page.cells.len();

    for (position, cell) in page.cells.iter().enumerate() {
        if cell.index != position {
            return Err(ReconcileError::CellIndexMismatch {
                position,
                index: cell.index,
            });
        }
        if !cell.bbox.is_finite() {
            return Err(ReconcileError::NonFiniteBBox {
                what: format!("cell {position}"),
            });
        }
    }

    let sets = [("primary", &page.primary), ("low", &page.low)];
    for (set, predictions) in sets {
        for prediction in predictions {
            if !prediction.bbox.is_finite() {
                return Err(ReconcileError::NonFiniteBBox {
                    what: format!("{set} prediction {}", prediction.id),
                });
            }
            if !prediction.confidence.is_finite() {
                return Err(ReconcileError::NonFiniteConfidence {
                    cluster_id: prediction.id,
                });
            }
            if let Some(&cell_index) = prediction.cell_ids.iter().find(|&&id| id >= cell_count) {
                return Err(ReconcileError::CellIndexOutOfRange {
                    cluster_id: prediction.id,
                    cell_index,
                    cell_count,
                });
            }
        }
    }

    Ok(())
}

/// Non-blank cells no cluster claims, ascending
fn unclaimed_text_cells(cells: &[TextCell], clusters: &[Cluster]) -> Result<Vec<usize>> {
    Ok(CellAssignment::build(cells.len(), clusters)?
        .orphan_cells()
        .into_iter()
        .filter(|&id| !cells[id].is_blank())
        .collect())
}

fn into_clusters(predictions: Vec<Prediction>, provenance: Provenance) -> Vec<Cluster> {
    predictions
        .into_iter()
        .map(|p| p.into_cluster(provenance))
        .collect()
}

/// Layout reconciler: one page of cells and predictions in, ordered clusters out
///
/// # Examples
///
/// ```
/// use docling_layout::{BBox, LayoutReconciler, PageInput, TextCell};
///
/// # fn main() -> docling_layout::Result<()> {
/// let page = PageInput {
///     cells: vec![
///         TextCell::new(0, BBox::new(0.0, 0.0, 10.0, 5.0), "Hello"),
///         TextCell::new(1, BBox::new(11.0, 0.0, 21.0, 5.0), "world"),
///     ],
///     ..PageInput::default()
/// };
///
/// let result = LayoutReconciler::new().process(page)?;
/// assert_eq!(result.clusters.len(), 1);
/// assert_eq!(result.clusters[0].text, "Hello world");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LayoutReconciler {
    stage01: Stage01CellAssigner,
    stage02: Stage02ClusterCleanup,
    stage03: Stage03OrphanResolver,
    stage04: Stage04ConnectivityMerge,
    stage05: Stage05BboxAdapter,
    stage06: Stage06ReadingOrder,
    coverage_sweep: bool,
    micro_profile: bool,
    /// Debug output directory for saving intermediate stage outputs
    debug_output_dir: Option<PathBuf>,
}

impl Default for LayoutReconciler {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutReconciler {
    /// Create a reconciler with default configuration
    #[inline]
    #[must_use = "reconciler is created but not used"]
    pub fn new() -> Self {
        Self::with_config(&ReconcileConfig::default())
    }

    /// Create a reconciler from a configuration
    ///
    /// The configuration is used as given; build it with
    /// [`ReconcileConfigBuilder`] or [`ReconcileConfig::from_json_str`] to get it
    /// validated.
    #[must_use = "reconciler is created but not used"]
    pub fn with_config(config: &ReconcileConfig) -> Self {
        Self {
            stage01: Stage01CellAssigner::with_config(config.cell_assignment),
            stage02: Stage02ClusterCleanup::with_config(config.cleanup),
            stage03: Stage03OrphanResolver::with_config(config.orphans),
            stage04: Stage04ConnectivityMerge::with_config(config.merge),
            stage05: Stage05BboxAdapter::with_config(config.bbox),
            stage06: Stage06ReadingOrder::with_config(config.reading_order),
            coverage_sweep: config.coverage_sweep,
            micro_profile: config.micro_profile,
            debug_output_dir: None,
        }
    }

    /// Save each stage's clusters as JSON under `debug_dir`
    #[must_use = "reconciler is created but not used"]
    pub fn with_debug_output(mut self, debug_dir: impl Into<PathBuf>) -> Self {
        self.debug_output_dir = Some(debug_dir.into());
        self
    }

    /// Reconcile one page
    ///
    /// # Errors
    ///
    /// Malformed input (see [`validate_page`]); nothing is returned for the page.
    pub fn process(&self, page: PageInput) -> Result<ReconciledPage> {
        let profile = self.micro_profile;
        timed_operation(profile, "validate", || validate_page(&page))?;

        let PageInput {
            cells,
            primary,
            low,
        } = page;
        debug!(
            "LayoutReconciler: {} cells, {} primary predictions, {} low-confidence predictions",
            cells.len(),
            primary.len(),
            low.len()
        );

        let mut ids = IdAllocator::after(primary.iter().chain(low.iter()).map(|p| p.id));
        let mut clusters = into_clusters(primary, Provenance::ModelPrimary);
        let low = into_clusters(low, Provenance::ModelLowConfRescue);

        timed_operation(profile, "stage01_assign", || {
            self.stage01.process(&mut clusters, &cells);
        });
        self.save_stage("stage01_assigned", &clusters);

        timed_operation(profile, "stage02_cleanup_initial", || {
            self.stage02.process(&mut clusters, CleanupPasses::INITIAL)
        });
        timed_operation(profile, "resolve_ambiguous", || {
            self.stage01.resolve_ambiguous_cells(&mut clusters, &cells)
        })?;
        self.save_stage("stage02_cleaned", &clusters);

        let orphans = unclaimed_text_cells(&cells, &clusters)?;
        let resolution = timed_operation(profile, "stage03_orphans", || {
            self.stage03
                .process(&mut clusters, &low, &cells, &orphans, &mut ids)
        });
        self.save_stage("stage03_orphans", &clusters);

        timed_operation(profile, "stage04_merge", || {
            self.stage04.process(&mut clusters, &mut ids)
        });
        self.save_stage("stage04_merged", &clusters);

        timed_operation(profile, "stage02_cleanup_post_merge", || {
            self.stage02.process(&mut clusters, CleanupPasses::POST_MERGE)
        });
        timed_operation(profile, "resolve_ambiguous", || {
            self.stage01.resolve_ambiguous_cells(&mut clusters, &cells)
        })?;

        if self.coverage_sweep && !resolution.lines_detector {
            let swept = Self::sweep_uncovered(&mut clusters, &cells, &mut ids)?;
            if swept > 0 {
                debug!("Coverage sweep: {} default clusters added", swept);
            }
        }
        self.save_stage("stage02_cleaned_post_merge", &clusters);

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            timed_operation(profile, "stage05_bbox", || {
                self.stage05.process(&mut clusters, &cells)
            });
            let report = timed_operation(profile, "stage02_cleanup_final", || {
                self.stage02.process(&mut clusters, CleanupPasses::FINAL)
            });
            if report.total() == 0 {
                break;
            }
            debug!(
                "Adapted boxes collided: {} clusters removed, adapting again (round {})",
                report.total(),
                rounds
            );
        }
        self.save_stage("stage05_adapted", &clusters);

        let clusters = timed_operation(profile, "stage06_reading_order", || {
            self.stage06.process(clusters, &cells)
        });
        self.save_stage("stage06_ordered", &clusters);

        let unassigned_cells = unclaimed_text_cells(&cells, &clusters)?;
        debug!(
            "LayoutReconciler: {} clusters, {} cells left unassigned, lines_detector={}",
            clusters.len(),
            unassigned_cells.len(),
            resolution.lines_detector
        );

        Ok(ReconciledPage {
            clusters,
            lines_detector: resolution.lines_detector,
            unassigned_cells,
        })
    }

    /// Parse a JSON page and reconcile it
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Json`] on malformed JSON, otherwise as [`LayoutReconciler::process`].
    pub fn process_json(&self, json: &str) -> Result<ReconciledPage> {
        let page: PageInput = serde_json::from_str(json)?;
        self.process(page)
    }

    /// Default clusters for non-blank cells that lost their cluster during cleanup
    fn sweep_uncovered(
        clusters: &mut Vec<Cluster>,
        cells: &[TextCell],
        ids: &mut IdAllocator,
    ) -> Result<usize> {
        let uncovered: Vec<usize> = unclaimed_text_cells(cells, clusters)?
            .into_iter()
            .filter(|&id| {
                !clusters
                    .iter()
                    .any(|c| c.label.is_picture() && c.bbox.contains(&cells[id].bbox))
            })
            .collect();

        for &cell_id in &uncovered {
            trace!("  Coverage sweep: cell[{}] -> default Text cluster", cell_id);
            clusters.push(Cluster::orphan(
                ids.allocate(),
                ClusterLabel::Text,
                &cells[cell_id],
            ));
        }
        Ok(uncovered.len())
    }

    /// Save a stage's clusters to JSON for debugging
    fn save_stage(&self, stage: &str, clusters: &[Cluster]) {
        let Some(debug_dir) = &self.debug_output_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(debug_dir) {
            error!("Failed to create debug directory: {e}");
            return;
        }

        let output_path = debug_dir.join(format!("{stage}.json"));
        match serde_json::to_string_pretty(clusters) {
            Ok(json_str) => {
                if let Err(e) = std::fs::write(&output_path, json_str) {
                    error!("Failed to save {stage} clusters: {e}");
                } else {
                    info!("Saved {} output: {}", stage, output_path.display());
                }
            }
            Err(e) => error!("Failed to serialize {stage} clusters: {e}"),
        }
    }
}

/// Stage 01: Cell Assignment
///
/// Associates raw text cells with candidate clusters and keeps the cell → cluster
/// reverse index consistent.
///
/// Algorithm:
/// 1. For each cluster, a cell belongs when
///    - `intersection_area(cell, cluster) > area(cell) * min_intersect_fraction` and `area(cell) > 0`, or
///    - the cluster contains the cell eroded by `containment_margin` on every side
/// 2. Build the reverse index (claiming clusters per cell, in cluster-list order)
/// 3. Derive orphan cells (no claimant) and ambiguous cells (several claimants)
///
/// Ambiguous cells are later resolved to a single owner by
/// [`Stage01CellAssigner::resolve_ambiguous_cells`].
use crate::error::{ReconcileError, Result};
use crate::geometry::BBox;
use crate::spatial::SpatialIndex;
use crate::types::{Cluster, TextCell};
use log::{debug, trace};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Configuration for Stage 01 (Cell Assignment)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage01Config {
    /// Minimum fraction of the cell area that must intersect the cluster (default 0.2)
    pub min_intersect_fraction: f64,
    /// Erosion applied to the cell before the containment fallback (default 3.0)
    pub containment_margin: f64,
}

impl Default for Stage01Config {
    #[inline]
    fn default() -> Self {
        Self {
            min_intersect_fraction: 0.2,
            containment_margin: 3.0,
        }
    }
}

/// Intersection area of `cell` with `cluster_bbox` when the cell belongs to it
#[inline]
fn belongs(cluster_bbox: &BBox, cell: &BBox, min_fraction: f64, margin: f64) -> Option<f64> {
    let intersection = cell.intersection_area(cluster_bbox);
    let cell_area = cell.area();

    let by_overlap = cell_area > 0.0 && intersection > cell_area * min_fraction;
    if by_overlap || cluster_bbox.contains_with_margin(cell, margin) {
        Some(intersection)
    } else {
        None
    }
}

/// Cells belonging to a cluster box, in input order, with their intersection areas
#[must_use]
pub fn assign_cells<'a>(
    cluster_bbox: &BBox,
    cells: impl IntoIterator<Item = &'a TextCell>,
    min_intersect_fraction: f64,
    containment_margin: f64,
) -> (Vec<usize>, Vec<f64>) {
    cells
        .into_iter()
        .filter_map(|cell| {
            belongs(
                cluster_bbox,
                &cell.bbox,
                min_intersect_fraction,
                containment_margin,
            )
            .map(|area| (cell.index, area))
        })
        .unzip()
}

/// Reverse index: which clusters (by position in the cluster list) claim each cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellAssignment {
    clusters_per_cell: Vec<Vec<usize>>,
}

impl CellAssignment {
    /// Build the reverse index from the clusters' `cell_ids`
    ///
    /// # Errors
    ///
    /// [`ReconcileError::CellIndexOutOfRange`] if a cluster references a cell
    /// outside `[0, cell_count)`.
    pub fn build(cell_count: usize, clusters: &[Cluster]) -> Result<Self> {
        let mut clusters_per_cell = vec![Vec::new(); cell_count];

        for (pos, cluster) in clusters.iter().enumerate() {
            for &cell_id in &cluster.cell_ids {
                let claimants = clusters_per_cell.get_mut(cell_id).ok_or(
                    ReconcileError::CellIndexOutOfRange {
                        cluster_id: cluster.id,
                        cell_index: cell_id,
                        cell_count,
                    },
                )?;
                if claimants.last() != Some(&pos) {
                    claimants.push(pos);
                }
            }
        }

        Ok(Self { clusters_per_cell })
    }

    /// Cluster positions claiming `cell_id`
    #[inline]
    #[must_use]
    pub fn claimants(&self, cell_id: usize) -> &[usize] {
        self.clusters_per_cell
            .get(cell_id)
            .map_or(&[][..], Vec::as_slice)
    }

    /// Cells claimed by no cluster, ascending
    #[must_use]
    pub fn orphan_cells(&self) -> Vec<usize> {
        self.cells_where(|claims| claims == 0)
    }

    /// Cells claimed by more than one cluster, ascending
    #[must_use]
    pub fn ambiguous_cells(&self) -> Vec<usize> {
        self.cells_where(|claims| claims > 1)
    }

    fn cells_where(&self, pred: impl Fn(usize) -> bool) -> Vec<usize> {
        self.clusters_per_cell
            .iter()
            .enumerate()
            .filter(|(_, claimants)| pred(claimants.len()))
            .map(|(cell_id, _)| cell_id)
            .collect()
    }
}

/// Stage 01: Cell Assigner
///
/// Input: working clusters + page cells
/// Output: clusters with `cell_ids` extended by geometric association
///
/// Cells already listed on a cluster are kept first; geometric matches are
/// appended in cell order, deduplicated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage01CellAssigner {
    config: Stage01Config,
}

impl Stage01CellAssigner {
    /// Create a new cell assigner with default configuration
    #[inline]
    #[must_use = "returns a new Stage01CellAssigner instance"]
    pub fn new() -> Self {
        Self {
            config: Stage01Config::default(),
        }
    }

    /// Create a new cell assigner with custom configuration
    #[inline]
    #[must_use = "returns a new Stage01CellAssigner with custom config"]
    pub const fn with_config(config: Stage01Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Stage01Config {
        &self.config
    }

    /// Assign cells to every cluster by geometry
    pub fn process(&self, clusters: &mut [Cluster], cells: &[TextCell]) {
        let cell_index = SpatialIndex::new(cells.iter().map(|c| &c.bbox));
        let mut assigned = 0usize;

        for cluster in clusters.iter_mut() {
            let (cell_ids, _) = assign_cells(
                &cluster.bbox,
                cell_index
                    .candidates(&cluster.bbox)
                    .into_iter()
                    .map(|pos| &cells[pos]),
                self.config.min_intersect_fraction,
                self.config.containment_margin,
            );
            assigned += cell_ids.len();
            cluster.extend_cells(cell_ids);
            trace!(
                "  Cluster ID={} label={} got {} cells",
                cluster.id,
                cluster.label,
                cluster.cell_ids.len()
            );
        }

        debug!(
            "{}: {} cell claims across {} clusters ({} cells)",
            self.stage_name(),
            assigned,
            clusters.len(),
            cells.len()
        );
    }

    /// Keep each multiply-claimed cell only in its best claimant
    ///
    /// Winner: highest confidence, then largest intersection with the cell, then
    /// earliest in list order. Clusters left empty (except pictures) are removed.
    /// Returns the number of ambiguous cells resolved.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::CellIndexOutOfRange`] if a cluster references a missing cell.
    pub fn resolve_ambiguous_cells(
        &self,
        clusters: &mut Vec<Cluster>,
        cells: &[TextCell],
    ) -> Result<usize> {
        let assignment = CellAssignment::build(cells.len(), clusters)?;
        let ambiguous = assignment.ambiguous_cells();
        if ambiguous.is_empty() {
            return Ok(0);
        }

        let mut removals: Vec<(usize, usize)> = Vec::new();
        for &cell_id in &ambiguous {
            let claimants = assignment.claimants(cell_id);
            let cell_bbox = &cells[cell_id].bbox;

            let Some(&winner) = claimants.iter().max_by_key(|&&pos| {
                let cluster = &clusters[pos];
                (
                    OrderedFloat(cluster.confidence),
                    OrderedFloat(cell_bbox.intersection_area(&cluster.bbox)),
                    Reverse(pos),
                )
            }) else {
                continue;
            };

            trace!(
                "  Ambiguous cell[{}] claimed by {:?}, kept by cluster ID={}",
                cell_id,
                claimants.iter().map(|&p| clusters[p].id).collect::<Vec<_>>(),
                clusters[winner].id
            );
            removals.extend(
                claimants
                    .iter()
                    .filter(|&&pos| pos != winner)
                    .map(|&pos| (pos, cell_id)),
            );
        }

        for (pos, cell_id) in removals {
            clusters[pos].cell_ids.retain(|&id| id != cell_id);
        }

        let before = clusters.len();
        clusters.retain(|c| !c.is_removable_when_empty());
        debug!(
            "{}: resolved {} ambiguous cells, dropped {} emptied clusters",
            self.stage_name(),
            ambiguous.len(),
            before - clusters.len()
        );

        Ok(ambiguous.len())
    }

    /// Get stage name for logging
    #[inline]
    #[must_use = "returns the stage name for logging"]
    pub const fn stage_name(&self) -> &'static str {
        "Stage01_CellAssigner"
    }
}

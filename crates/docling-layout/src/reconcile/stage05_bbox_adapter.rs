/// Stage 05: BBox Adaptation
///
/// Recomputes each cluster's bbox from its member cells:
/// - Text-like: enclosing box of the non-blank cells (detector box discarded);
///   all cells when every member is blank
/// - Picture: union of detector box and cells (unchanged without cells)
/// - Table: union of detector box and cells, then trimmed so that cells owned by
///   other clusters no longer sit inside it, each cut on the side nearest to
///   the foreign cell
///
/// Table trimming never cuts into the enclosing box of the table's own cells.
use crate::geometry::BBox;
use crate::spatial::SpatialIndex;
use crate::types::{Cluster, TextCell};
use log::{debug, trace};
use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Configuration for Stage 05 (BBox Adaptation)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage05Config {
    /// Covered fraction of a foreign cell above which it counts as enclosed by a table (default 0.3)
    pub table_spurious_fraction: f64,
}

impl Default for Stage05Config {
    #[inline]
    fn default() -> Self {
        Self {
            table_spurious_fraction: 0.3,
        }
    }
}

/// Table edge to move inward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    const ALL: [Self; 4] = [Self::Left, Self::Right, Self::Bottom, Self::Top];

    /// `bbox` with this edge moved just past `cell`, if the cut keeps `legit` inside
    fn cut(self, bbox: &BBox, cell: &BBox, legit: &BBox) -> Option<BBox> {
        let mut out = *bbox;
        match self {
            Self::Left => out.l = cell.r,
            Self::Right => out.r = cell.l,
            Self::Bottom => out.b = cell.t,
            Self::Top => out.t = cell.b,
        }
        let keeps_legit = out.l <= legit.l && out.r >= legit.r && out.b <= legit.b && out.t >= legit.t;
        (keeps_legit && out.l <= out.r && out.b <= out.t).then_some(out)
    }

    /// Gap between this edge of `bbox` and the facing side of `cell`
    fn distance(self, bbox: &BBox, cell: &BBox) -> f64 {
        match self {
            Self::Left => cell.l - bbox.l,
            Self::Right => bbox.r - cell.r,
            Self::Bottom => cell.b - bbox.b,
            Self::Top => bbox.t - cell.t,
        }
    }
}

/// Stage 05: BBox Adapter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage05BboxAdapter {
    config: Stage05Config,
}

impl Stage05BboxAdapter {
    #[inline]
    #[must_use = "returns a new Stage05BboxAdapter instance"]
    pub fn new() -> Self {
        Self {
            config: Stage05Config::default(),
        }
    }

    #[inline]
    #[must_use = "returns a new Stage05BboxAdapter with custom config"]
    pub const fn with_config(config: Stage05Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Stage05Config {
        &self.config
    }

    /// Adapt every cluster's bbox; returns the number of tables trimmed
    pub fn process(&self, clusters: &mut Vec<Cluster>, cells: &[TextCell]) -> usize {
        let before = clusters.len();
        clusters.retain(|c| !c.is_removable_when_empty());

        let mut assigned = vec![false; cells.len()];
        for cluster in clusters.iter() {
            for &cell_id in &cluster.cell_ids {
                assigned[cell_id] = true;
            }
        }
        let cell_index = SpatialIndex::new(cells.iter().map(|c| &c.bbox));
        let mut trimmed = 0usize;

        for cluster in clusters.iter_mut() {
            if !cluster.has_cells() {
                continue;
            }
            let cells_bbox = BBox::union_all(cluster.cell_ids.iter().map(|&id| &cells[id].bbox));

            if cluster.label.is_text_like() {
                let mut inked = cluster
                    .cell_ids
                    .iter()
                    .map(|&id| &cells[id])
                    .filter(|cell| !cell.is_blank())
                    .peekable();
                cluster.bbox = if inked.peek().is_some() {
                    BBox::union_all(inked.map(|cell| &cell.bbox))
                } else {
                    cells_bbox
                };
            } else if cluster.label.is_picture() {
                cluster.bbox = cluster.bbox.union(&cells_bbox);
            } else {
                let expanded = cluster.bbox.union(&cells_bbox);
                let adapted = self.trim_table(cluster, expanded, &cells_bbox, cells, &cell_index, &assigned);
                if adapted != expanded {
                    trace!(
                        "  Table ID={} trimmed from {:?} to {:?}",
                        cluster.id,
                        expanded,
                        adapted
                    );
                    trimmed += 1;
                }
                cluster.bbox = adapted;
            }
        }

        debug!(
            "{}: {} -> {} clusters, {} tables trimmed",
            self.stage_name(),
            before,
            clusters.len(),
            trimmed
        );

        trimmed
    }

    /// Cut table edges until no foreign cell is enclosed
    ///
    /// Foreign cells are handled in index order; each is cut off on its nearest
    /// side among the cuts that keep `legit` (ties: left, right, bottom, top).
    fn trim_table(
        &self,
        table: &Cluster,
        mut bbox: BBox,
        legit: &BBox,
        cells: &[TextCell],
        cell_index: &SpatialIndex,
        assigned: &[bool],
    ) -> BBox {
        let threshold = self.config.table_spurious_fraction;
        let members: FxHashSet<usize> = table.cell_ids.iter().copied().collect();
        let spurious: Vec<usize> = cell_index
            .candidates(&bbox)
            .into_iter()
            .filter(|&id| assigned[id] && !members.contains(&id))
            .filter(|&id| cells[id].bbox.intersection_over_self(&bbox) > threshold)
            .collect();

        for id in spurious {
            let cell = &cells[id].bbox;
            if cell.intersection_over_self(&bbox) <= threshold {
                continue;
            }
            let best = Edge::ALL
                .iter()
                .enumerate()
                .filter_map(|(order, edge)| edge.cut(&bbox, cell, legit).map(|b| (order, b)))
                .min_by_key(|(order, _)| {
                    (OrderedFloat(Edge::ALL[*order].distance(&bbox, cell)), *order)
                });

            match best {
                Some((order, cut)) => {
                    trace!(
                        "  Table ID={}: cell[{}] excluded by cutting {:?} edge",
                        table.id,
                        id,
                        Edge::ALL[order]
                    );
                    bbox = cut;
                }
                None => trace!(
                    "  Table ID={}: cell[{}] cannot be excluded without cutting own cells",
                    table.id,
                    id
                ),
            }
        }

        bbox
    }

    /// Get stage name for logging
    #[inline]
    #[must_use = "returns the stage name for logging"]
    pub const fn stage_name(&self) -> &'static str {
        "Stage05_BboxAdapter"
    }
}

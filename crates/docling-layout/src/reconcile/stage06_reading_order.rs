/// Stage 06: Reading Order
///
/// Orders the final clusters and fills their text.
///
/// Algorithm:
/// 1. Sort each cluster's `cell_ids` ascending
/// 2. Stable-sort clusters with cells by their smallest cell index
/// 3. Append clusters without cells (pictures) in their current order
/// 4. Renumber ids `0..N-1` in that order
/// 5. Join member cell texts: space within a line, newline between lines
use crate::types::{Cluster, TextCell};
use log::debug;
use serde::{Deserialize, Serialize};

/// Configuration for Stage 06 (Reading Order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage06Config {
    /// Vertical overlap fraction at which two cells are on the same line (default 0.5)
    pub same_line_overlap: f64,
}

impl Default for Stage06Config {
    #[inline]
    fn default() -> Self {
        Self {
            same_line_overlap: 0.5,
        }
    }
}

/// Join cell texts in order, skipping blank cells
///
/// Consecutive cells share a line (joined by a space) when their vertical overlap
/// fraction is at least `same_line_overlap`; otherwise a newline separates them.
#[must_use]
pub fn assemble_text<'a>(cells: impl IntoIterator<Item = &'a TextCell>, same_line_overlap: f64) -> String {
    let mut text = String::new();
    let mut previous: Option<&TextCell> = None;

    for cell in cells {
        let trimmed = cell.text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(prev) = previous {
            if prev.bbox.vertical_overlap_fraction(&cell.bbox) >= same_line_overlap {
                text.push(' ');
            } else {
                text.push('\n');
            }
        }
        text.push_str(trimmed);
        previous = Some(cell);
    }

    text
}

/// Stage 06: Reading Order Sequencer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage06ReadingOrder {
    config: Stage06Config,
}

impl Stage06ReadingOrder {
    #[inline]
    #[must_use = "returns a new Stage06ReadingOrder instance"]
    pub fn new() -> Self {
        Self {
            config: Stage06Config::default(),
        }
    }

    #[inline]
    #[must_use = "returns a new Stage06ReadingOrder with custom config"]
    pub const fn with_config(config: Stage06Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Stage06Config {
        &self.config
    }

    /// Order clusters, renumber ids and assemble text
    #[must_use = "returns the clusters in reading order"]
    pub fn process(&self, clusters: Vec<Cluster>, cells: &[TextCell]) -> Vec<Cluster> {
        let (mut with_cells, without_cells): (Vec<Cluster>, Vec<Cluster>) =
            clusters.into_iter().partition(Cluster::has_cells);

        for cluster in &mut with_cells {
            cluster.cell_ids.sort_unstable();
        }
        // Stable: clusters starting at the same cell keep their relative order
        with_cells.sort_by_key(Cluster::min_cell_index);

        let empty_count = without_cells.len();
        let mut ordered = with_cells;
        ordered.extend(without_cells);

        for (position, cluster) in ordered.iter_mut().enumerate() {
            cluster.id = position;
            cluster.text = assemble_text(
                cluster.cell_ids.iter().map(|&id| &cells[id]),
                self.config.same_line_overlap,
            );
        }

        debug!(
            "{}: {} clusters ordered ({} without cells)",
            self.stage_name(),
            ordered.len(),
            empty_count
        );

        ordered
    }

    /// Get stage name for logging
    #[inline]
    #[must_use = "returns the stage name for logging"]
    pub const fn stage_name(&self) -> &'static str {
        "Stage06_ReadingOrder"
    }
}

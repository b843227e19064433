//! # Reconciliation Stages
//!
//! Each stage is a small struct with its own `StageNNConfig`, `new()`,
//! `with_config()` and a `process` entry point, so it can be tested in isolation.
//! [`LayoutReconciler`] chains them for one page.
//!
//! ## Pipeline Stages
//!
//! ### Stage 01: Cell Assignment ([`Stage01CellAssigner`])
//! - **Input:** Primary predictions, page cells
//! - **Process:** Cells join a cluster when more than 20% of their area overlaps it,
//!   or when the cluster contains them after a 3-unit erosion. Also resolves cells
//!   claimed by several clusters to a single owner.
//! - **Output:** Clusters with `cell_ids`
//!
//! ### Stage 02: Cluster Cleanup ([`Stage02ClusterCleanup`])
//! - **Input:** Clusters with cells
//! - **Process:** Removes duplicates by confidence, absorbs contained clusters,
//!   removes text sitting on pictures/tables and degenerate tables
//! - **Output:** Non-overlapping clusters; empty clusters dropped (pictures kept)
//! - **Note:** Runs at three points, see [`CleanupPasses::INITIAL`],
//!   [`CleanupPasses::POST_MERGE`] and [`CleanupPasses::FINAL`]
//!
//! ### Stage 03: Orphan Resolution ([`Stage03OrphanResolver`])
//! - **Input:** Clusters, low-confidence predictions, unclaimed cells
//! - **Process:** Rescues orphans into low-confidence clusters, then gives the rest
//!   singleton default clusters (skipping pictures and numbered-line columns)
//! - **Output:** Clusters plus `lines_detector` flag
//!
//! ### Stage 04: Connectivity Merge ([`Stage04ConnectivityMerge`])
//! - **Input:** Clusters
//! - **Process:** Union-find over default clusters whose 2-unit dilated boxes touch
//! - **Output:** One merged Text cluster per connected component
//!
//! ### Stage 05: BBox Adaptation ([`Stage05BboxAdapter`])
//! - **Input:** Final cluster membership
//! - **Process:** Fits text boxes to their non-blank cells, grows picture/table
//!   boxes, trims tables around foreign cells on the nearest side
//! - **Note:** Alternates with the final duplicate cleanup until nothing is removed
//! - **Output:** Clusters with adapted bboxes
//!
//! ### Stage 06: Reading Order ([`Stage06ReadingOrder`])
//! - **Input:** Adapted clusters
//! - **Process:** Orders by smallest cell index, renumbers ids, joins cell text
//! - **Output:** Clusters in reading order with dense ids

pub mod orchestrator;
pub mod stage01_cell_assigner;
pub mod stage02_cluster_cleanup;
pub mod stage03_orphan_resolver;
pub mod stage04_connectivity_merge;
pub mod stage05_bbox_adapter;
pub mod stage06_reading_order;

pub use orchestrator::{validate_page, LayoutReconciler, ReconcileConfig, ReconcileConfigBuilder};
pub use stage01_cell_assigner::{assign_cells, CellAssignment, Stage01CellAssigner, Stage01Config};
pub use stage02_cluster_cleanup::{
    CleanupPasses, CleanupReport, Stage02ClusterCleanup, Stage02Config,
};
pub use stage03_orphan_resolver::{
    consecutive_runs, OrphanResolution, Stage03Config, Stage03OrphanResolver,
};
pub use stage04_connectivity_merge::{Stage04ConnectivityMerge, Stage04Config};
pub use stage05_bbox_adapter::{Stage05BboxAdapter, Stage05Config};
pub use stage06_reading_order::{assemble_text, Stage06Config, Stage06ReadingOrder};

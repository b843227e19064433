//! # Docling Layout - Layout Reconciliation Engine
//!
//! Turns the raw text cells of a page and the layout detector's region predictions
//! into one clean set of labeled clusters: every text cell in exactly one cluster,
//! no duplicate regions, tight bounding boxes and a deterministic reading order.
//!
//! The detector is consumed at two confidence thresholds. Primary predictions become
//! clusters; low-confidence predictions are only used to rescue cells that no
//! primary cluster covers.
//!
//! ## Quick Start
//!
//! ```
//! use docling_layout::{BBox, ClusterLabel, LayoutReconciler, PageInput, Prediction, TextCell};
//!
//! # fn main() -> docling_layout::Result<()> {
//! let page = PageInput {
//!     cells: vec![
//!         TextCell::new(0, BBox::new(72.0, 700.0, 200.0, 712.0), "Results"),
//!         TextCell::new(1, BBox::new(72.0, 680.0, 300.0, 690.0), "The measured values"),
//!     ],
//!     primary: vec![Prediction::new(0, "Section-header", BBox::new(70.0, 698.0, 210.0, 714.0), 0.92)],
//!     low: Vec::new(),
//! };
//!
//! let result = LayoutReconciler::new().process(page)?;
//! assert_eq!(result.clusters[0].label, ClusterLabel::SectionHeader);
//! assert_eq!(result.clusters[1].text, "The measured values");
//! # Ok(())
//! # }
//! ```
//!
//! ## Coordinates
//!
//! Boxes use a bottom-left origin with y increasing upward: `(l, b, r, t)`.
//!
//! ## Configuration
//!
//! Thresholds live in per-stage configs aggregated by [`ReconcileConfig`], built with
//! [`ReconcileConfigBuilder`] or loaded from JSON via [`ReconcileConfig::from_json_file`].
//!
//! ## Logging
//!
//! The crate logs through the `log` facade (`debug` per stage, `trace` per decision,
//! `warn` for clamped geometry). Install any logger to see it.

pub mod error;
pub mod geometry;
pub mod reconcile;
pub mod spatial;
pub mod types;

pub use error::{ReconcileError, Result};
pub use geometry::BBox;
pub use reconcile::{
    CleanupPasses, LayoutReconciler, OrphanResolution, ReconcileConfig, ReconcileConfigBuilder,
    Stage01CellAssigner, Stage02ClusterCleanup, Stage03OrphanResolver, Stage04ConnectivityMerge,
    Stage05BboxAdapter, Stage06ReadingOrder,
};
pub use types::{
    Cluster, ClusterLabel, IdAllocator, PageInput, Prediction, Provenance, ReconciledPage,
    TextCell, SYNTHETIC_CONFIDENCE,
};

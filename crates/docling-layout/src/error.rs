//! Error types for layout reconciliation
//!
//! Only malformed input is fatal. Geometric degeneracy, ambiguous cell claims and
//! orphans without a rescue candidate are absorbed by the stages themselves.
//!
//! # Examples
//!
//! ```
//! use docling_layout::{BBox, LayoutReconciler, PageInput, ReconcileError, TextCell};
//!
//! let page = PageInput {
//!     cells: vec![TextCell::new(1, BBox::new(0.0, 0.0, 10.0, 5.0), "misnumbered")],
//!     ..PageInput::default()
//! };
//!
//! match LayoutReconciler::new().process(page) {
//!     Err(ReconcileError::CellIndexMismatch { position, index }) => {
//!         assert_eq!((position, index), (0, 1));
//!     }
//!     other => panic!("unexpected result: {other:?}"),
//! }
//! ```

use thiserror::Error;

/// Errors that can occur during layout reconciliation
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A cell's `index` does not match its position in the page's cell list
    #[error("Cell at position {position} has index {index}")]
    CellIndexMismatch {
        /// Position in the cell list
        position: usize,
        /// Index stored on the cell
        index: usize,
    },

    /// A prediction references a cell that does not exist on the page
    #[error("Cluster {cluster_id} references cell {cell_index}, page has {cell_count} cells")]
    CellIndexOutOfRange {
        cluster_id: usize,
        cell_index: usize,
        cell_count: usize,
    },

    /// A bounding box has a NaN or infinite coordinate
    #[error("Non-finite bounding box on {what}")]
    NonFiniteBBox {
        /// Which record carried the box (e.g. "cell 4", "primary prediction 2")
        what: String,
    },

    /// A prediction confidence is NaN or infinite
    #[error("Non-finite confidence on prediction {cluster_id}")]
    NonFiniteConfidence { cluster_id: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// IO error while reading configuration or page files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    /// True for errors caused by the page data rather than configuration or IO
    #[inline]
    #[must_use]
    pub const fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::CellIndexMismatch { .. }
                | Self::CellIndexOutOfRange { .. }
                | Self::NonFiniteBBox { .. }
                | Self::NonFiniteConfidence { .. }
        )
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

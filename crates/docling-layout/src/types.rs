/// Shared types for the reconciliation stages
///
/// Cells are owned by the page and referenced everywhere else by `index`.
/// All records derive serde so pages and results can be stored as JSON fixtures.
use crate::geometry::BBox;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence carried by clusters the engine creates itself
pub const SYNTHETIC_CONFIDENCE: f64 = -1.0;

/// Raw text cell extracted from the page (word or character run)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    /// Stable id within the page: the cell's position in the page's cell list
    pub index: usize,
    pub bbox: BBox,
    pub text: String,
}

impl TextCell {
    #[inline]
    #[must_use = "returns a new TextCell instance"]
    pub fn new(index: usize, bbox: BBox, text: impl Into<String>) -> Self {
        Self {
            index,
            bbox,
            text: text.into(),
        }
    }

    /// Cells with whitespace-only text carry no content to recover
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Layout label of a cluster
///
/// Parsed leniently from detector strings (`"Section-header"`, `"section_header"`,
/// `"List-item"` ...). Unknown strings land in [`ClusterLabel::Other`] and are
/// treated as text-like, so a new detector class cannot silently match the
/// Table/Picture heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterLabel {
    /// Regular body text paragraph
    #[default]
    Text,
    /// Document or section title
    Title,
    /// Section or chapter heading
    SectionHeader,
    /// Item in a bulleted or numbered list
    ListItem,
    /// Tabular data structure
    Table,
    /// Raster image, photograph or figure
    Picture,
    /// Caption for figures, tables, or other elements
    Caption,
    /// Footnote or endnote text
    Footnote,
    /// Mathematical formula or equation
    Formula,
    /// Source code or preformatted text
    Code,
    /// Running header at top of page
    PageHeader,
    /// Running footer at bottom of page
    PageFooter,
    /// Label the engine has no dedicated handling for
    Other(String),
}

impl ClusterLabel {
    /// Parse a detector label string
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "text" | "paragraph" => Self::Text,
            "title" => Self::Title,
            "section_header" => Self::SectionHeader,
            "list_item" => Self::ListItem,
            "table" => Self::Table,
            "picture" | "figure" => Self::Picture,
            "caption" => Self::Caption,
            "footnote" => Self::Footnote,
            "formula" => Self::Formula,
            "code" => Self::Code,
            "page_header" => Self::PageHeader,
            "page_footer" => Self::PageFooter,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// Canonical snake_case name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Title => "title",
            Self::SectionHeader => "section_header",
            Self::ListItem => "list_item",
            Self::Table => "table",
            Self::Picture => "picture",
            Self::Caption => "caption",
            Self::Footnote => "footnote",
            Self::Formula => "formula",
            Self::Code => "code",
            Self::PageHeader => "page_header",
            Self::PageFooter => "page_footer",
            Self::Other(raw) => raw,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table)
    }

    #[inline]
    #[must_use]
    pub fn is_picture(&self) -> bool {
        matches!(self, Self::Picture)
    }

    /// Everything that is neither a Table nor a Picture
    ///
    /// Text-like clusters get their bbox replaced by the enclosing box of their cells.
    #[inline]
    #[must_use]
    pub fn is_text_like(&self) -> bool {
        !self.is_table() && !self.is_picture()
    }
}

impl From<String> for ClusterLabel {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for ClusterLabel {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<ClusterLabel> for String {
    fn from(label: ClusterLabel) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which phase created or rescued a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Primary (normal-confidence) detector output
    #[default]
    ModelPrimary,
    /// Low-confidence detection attached to rescue orphan cells
    ModelLowConfRescue,
    /// Union of connected default clusters
    MergedCells,
    /// Singleton cluster created for an orphan cell
    OrphanDefault,
}

/// Labeled group of cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: usize,
    pub label: ClusterLabel,
    pub bbox: BBox,
    /// Member cell indices, deduplicated, insertion order
    #[serde(default)]
    pub cell_ids: Vec<usize>,
    /// Detector confidence in `[0, 1]`, or [`SYNTHETIC_CONFIDENCE`]
    pub confidence: f64,
    #[serde(default)]
    pub provenance: Provenance,
    /// Member cell text joined in `cell_ids` order (filled by the reading-order stage)
    #[serde(default)]
    pub text: String,
}

impl Cluster {
    #[must_use = "returns a new Cluster instance"]
    pub fn new(
        id: usize,
        label: ClusterLabel,
        bbox: BBox,
        confidence: f64,
        provenance: Provenance,
    ) -> Self {
        Self {
            id,
            label,
            bbox,
            cell_ids: Vec::new(),
            confidence,
            provenance,
            text: String::new(),
        }
    }

    /// Synthetic text cluster for an orphan cell
    #[must_use]
    pub fn orphan(id: usize, label: ClusterLabel, cell: &TextCell) -> Self {
        let mut cluster = Self::new(
            id,
            label,
            cell.bbox,
            SYNTHETIC_CONFIDENCE,
            Provenance::OrphanDefault,
        );
        cluster.cell_ids.push(cell.index);
        cluster
    }

    /// Append a cell id unless already present
    #[inline]
    pub fn push_cell(&mut self, cell_id: usize) {
        if !self.cell_ids.contains(&cell_id) {
            self.cell_ids.push(cell_id);
        }
    }

    /// Append cell ids in order, skipping ones already present
    pub fn extend_cells(&mut self, cell_ids: impl IntoIterator<Item = usize>) {
        for cell_id in cell_ids {
            self.push_cell(cell_id);
        }
    }

    #[inline]
    #[must_use]
    pub fn has_cells(&self) -> bool {
        !self.cell_ids.is_empty()
    }

    /// Smallest member cell index (reading-order key)
    #[inline]
    #[must_use]
    pub fn min_cell_index(&self) -> Option<usize> {
        self.cell_ids.iter().copied().min()
    }

    /// Empty clusters are only meaningful for pictures
    #[inline]
    #[must_use]
    pub fn is_removable_when_empty(&self) -> bool {
        self.cell_ids.is_empty() && !self.label.is_picture()
    }
}

/// Detector output record as consumed from the layout model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: usize,
    #[serde(rename = "type", alias = "label")]
    pub label: ClusterLabel,
    pub bbox: BBox,
    /// Cells already attributed by the detector (usually empty)
    #[serde(default)]
    pub cell_ids: Vec<usize>,
    pub confidence: f64,
}

impl Prediction {
    #[must_use = "returns a new Prediction instance"]
    pub fn new(id: usize, label: impl Into<ClusterLabel>, bbox: BBox, confidence: f64) -> Self {
        Self {
            id,
            label: label.into(),
            bbox,
            cell_ids: Vec::new(),
            confidence,
        }
    }

    /// Convert into a working cluster with the given provenance
    #[must_use]
    pub fn into_cluster(self, provenance: Provenance) -> Cluster {
        let mut cluster = Cluster::new(self.id, self.label, self.bbox, self.confidence, provenance);
        cluster.extend_cells(self.cell_ids);
        cluster
    }
}

/// Everything the engine needs for one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInput {
    /// Cells in backend order; `cells[i].index == i`
    pub cells: Vec<TextCell>,
    /// Normal-confidence detections
    #[serde(default, alias = "predictions_primary")]
    pub primary: Vec<Prediction>,
    /// Low-confidence-threshold detections, used only to rescue orphans
    #[serde(default, alias = "predictions_low")]
    pub low: Vec<Prediction>,
}

/// Hands out synthetic cluster ids past every id seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdAllocator {
    next: usize,
}

impl IdAllocator {
    /// Start after the largest id in `ids` (0 when empty)
    #[must_use]
    pub fn after(ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            next: ids.into_iter().max().map_or(0, |max| max + 1),
        }
    }

    /// Take the next id
    #[inline]
    pub fn allocate(&mut self) -> usize {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Reconciled page: clusters in reading order with dense ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciledPage {
    pub clusters: Vec<Cluster>,
    /// Line-number suppression fired: default-to-text assignment was skipped
    pub lines_detector: bool,
    /// Non-blank cells intentionally left without a cluster, ascending
    pub unassigned_cells: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing_aliases() {
        assert_eq!(ClusterLabel::parse("Section-header"), ClusterLabel::SectionHeader);
        assert_eq!(ClusterLabel::parse("section_header"), ClusterLabel::SectionHeader);
        assert_eq!(ClusterLabel::parse("List-item"), ClusterLabel::ListItem);
        assert_eq!(ClusterLabel::parse("Page-footer"), ClusterLabel::PageFooter);
        assert_eq!(ClusterLabel::parse("Figure"), ClusterLabel::Picture);
        assert_eq!(ClusterLabel::parse(" Text "), ClusterLabel::Text);
        assert_eq!(
            ClusterLabel::parse("Checkbox-Selected"),
            ClusterLabel::Other("Checkbox-Selected".to_string())
        );
    }

    #[test]
    fn test_other_label_is_text_like() {
        let label = ClusterLabel::parse("key_value_region");
        assert!(label.is_text_like());
        assert_eq!(label.as_str(), "key_value_region");
    }

    #[test]
    fn test_prediction_json_uses_type_field() {
        let json = r#"{"id": 3, "type": "Table", "bbox": {"l": 0.0, "b": 0.0, "r": 10.0, "t": 10.0}, "confidence": 0.8}"#;
        let prediction: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.label, ClusterLabel::Table);
        assert!(prediction.cell_ids.is_empty());

        let back = serde_json::to_value(&prediction).unwrap();
        assert_eq!(back["type"], "table");
    }

    #[test]
    fn test_cluster_cells_deduplicated_in_order() {
        let mut cluster = Cluster::new(
            0,
            ClusterLabel::Text,
            BBox::default(),
            0.9,
            Provenance::ModelPrimary,
        );
        cluster.extend_cells([4, 2, 4, 7, 2]);
        assert_eq!(cluster.cell_ids, vec![4, 2, 7]);
        assert_eq!(cluster.min_cell_index(), Some(2));
    }

    #[test]
    fn test_empty_picture_is_kept() {
        let picture = Cluster::new(
            0,
            ClusterLabel::Picture,
            BBox::new(0.0, 0.0, 50.0, 50.0),
            0.8,
            Provenance::ModelPrimary,
        );
        assert!(!picture.is_removable_when_empty());

        let text = Cluster::new(1, ClusterLabel::Text, BBox::default(), 0.8, Provenance::ModelPrimary);
        assert!(text.is_removable_when_empty());
    }

    #[test]
    fn test_id_allocator_starts_past_max() {
        let mut ids = IdAllocator::after([3, 9, 1]);
        assert_eq!(ids.allocate(), 10);
        assert_eq!(ids.allocate(), 11);

        assert_eq!(IdAllocator::after(std::iter::empty()).allocate(), 0);
    }

    #[test]
    fn test_provenance_serialization() {
        let json = serde_json::to_string(&Provenance::ModelLowConfRescue).unwrap();
        assert_eq!(json, "\"model_low_conf_rescue\"");
    }
}

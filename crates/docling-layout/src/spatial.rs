//! R-tree candidate index over bounding boxes
//!
//! Only prunes pair scans: callers re-check every candidate with their exact
//! predicate, so the index never changes a result, only the cost of finding it.
use crate::geometry::BBox;
use rstar::{RTree, RTreeObject, AABB};

/// Envelope for R-tree spatial indexing
#[derive(Debug, Clone, Copy)]
struct IndexedBox {
    aabb: AABB<[f64; 2]>,
    idx: usize,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

#[inline]
fn to_aabb(bbox: &BBox) -> AABB<[f64; 2]> {
    // from_corners normalises inverted boxes
    AABB::from_corners([bbox.l, bbox.b], [bbox.r, bbox.t])
}

/// Spatial index mapping boxes to their position in the slice they were built from
pub struct SpatialIndex {
    tree: RTree<IndexedBox>,
}

impl SpatialIndex {
    /// Build index from boxes; positions in the iterator become the returned ids
    pub fn new<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Self {
        let entries: Vec<IndexedBox> = boxes
            .into_iter()
            .enumerate()
            .map(|(idx, bbox)| IndexedBox {
                aabb: to_aabb(bbox),
                idx,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Positions of all boxes whose envelope intersects `bbox` (edges inclusive),
    /// in ascending order
    #[must_use]
    pub fn candidates(&self, bbox: &BBox) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&to_aabb(bbox))
            .map(|entry| entry.idx)
            .collect();
        found.sort_unstable();
        found
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

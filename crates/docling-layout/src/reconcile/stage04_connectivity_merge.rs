/// Stage 04: Connectivity Merge
///
/// Joins default (orphan) clusters that touch after dilation into one Text
/// cluster per connected component.
///
/// Algorithm:
/// 1. Nodes: clusters with provenance `OrphanDefault`, in list order
/// 2. Edges: both bboxes dilated by `dilation` intersect (R-tree candidates, exact re-check)
/// 3. Connected components via union-find (union by rank, path compression)
/// 4. Each component with ≥2 members becomes a `MergedCells` Text cluster; members are deleted
use crate::geometry::BBox;
use crate::spatial::SpatialIndex;
use crate::types::{Cluster, ClusterLabel, IdAllocator, Provenance, SYNTHETIC_CONFIDENCE};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Configuration for Stage 04 (Connectivity Merge)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage04Config {
    /// Margin added on every side before the intersection test (default 2.0)
    pub dilation: f64,
}

impl Default for Stage04Config {
    #[inline]
    fn default() -> Self {
        Self { dilation: 2.0 }
    }
}

/// Union-Find over `0..len`
#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Find the root of element x with path compression
    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    /// Union two elements by rank
    fn union(&mut self, x: usize, y: usize) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }

        match self.rank[root_x].cmp(&self.rank[root_y]) {
            std::cmp::Ordering::Greater => self.parent[root_y] = root_x,
            std::cmp::Ordering::Less => self.parent[root_x] = root_y,
            std::cmp::Ordering::Equal => {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
    }

    /// Components as ascending member lists, ordered by smallest member
    fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); self.parent.len()];
        for x in 0..self.parent.len() {
            let root = self.find(x);
            by_root[root].push(x);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_iter().filter(|g| !g.is_empty()).collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

/// Stage 04: Connectivity Merger
///
/// Input: clusters after orphan resolution
/// Output: same clusters with connected default clusters replaced by merged ones
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage04ConnectivityMerge {
    config: Stage04Config,
}

impl Stage04ConnectivityMerge {
    #[inline]
    #[must_use = "returns a new Stage04ConnectivityMerge instance"]
    pub fn new() -> Self {
        Self {
            config: Stage04Config::default(),
        }
    }

    #[inline]
    #[must_use = "returns a new Stage04ConnectivityMerge with custom config"]
    pub const fn with_config(config: Stage04Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Stage04Config {
        &self.config
    }

    /// Merge connected default clusters; returns the number of merged clusters created
    pub fn process(&self, clusters: &mut Vec<Cluster>, ids: &mut IdAllocator) -> usize {
        let nodes: Vec<usize> = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.provenance == Provenance::OrphanDefault)
            .map(|(pos, _)| pos)
            .collect();
        if nodes.len() < 2 {
            return 0;
        }

        let dilated: Vec<BBox> = nodes
            .iter()
            .map(|&pos| clusters[pos].bbox.dilated(self.config.dilation))
            .collect();
        let index = SpatialIndex::new(&dilated);
        let mut uf = UnionFind::new(nodes.len());
        let mut edges = 0usize;

        for (i, bbox) in dilated.iter().enumerate() {
            for j in index.candidates(bbox) {
                if j > i && bbox.intersects(&dilated[j]) {
                    uf.union(i, j);
                    edges += 1;
                }
            }
        }

        let components: Vec<Vec<usize>> = uf
            .groups()
            .into_iter()
            .filter(|members| members.len() > 1)
            .collect();
        if components.is_empty() {
            debug!(
                "{}: {} default clusters, {} edges, nothing to merge",
                self.stage_name(),
                nodes.len(),
                edges
            );
            return 0;
        }

        let mut consumed = vec![false; clusters.len()];
        let mut merged = Vec::with_capacity(components.len());
        for members in &components {
            let positions: Vec<usize> = members.iter().map(|&m| nodes[m]).collect();
            let bbox = BBox::union_all(positions.iter().map(|&pos| &clusters[pos].bbox));

            let mut cluster = Cluster::new(
                ids.allocate(),
                ClusterLabel::Text,
                bbox,
                SYNTHETIC_CONFIDENCE,
                Provenance::MergedCells,
            );
            for &pos in &positions {
                cluster.extend_cells(clusters[pos].cell_ids.iter().copied());
                consumed[pos] = true;
            }
            trace!(
                "  Merged {} default clusters {:?} into ID={} with {} cells",
                positions.len(),
                positions.iter().map(|&p| clusters[p].id).collect::<Vec<_>>(),
                cluster.id,
                cluster.cell_ids.len()
            );
            merged.push(cluster);
        }

        let input_count = clusters.len();
        let mut pos = 0;
        clusters.retain(|_| {
            let keep = !consumed[pos];
            pos += 1;
            keep
        });
        let created = merged.len();
        clusters.extend(merged);

        debug!(
            "{}: {} default clusters, {} edges, {} components merged ({} -> {} clusters)",
            self.stage_name(),
            nodes.len(),
            edges,
            created,
            input_count,
            clusters.len()
        );

        created
    }

    /// Get stage name for logging
    #[inline]
    #[must_use = "returns the stage name for logging"]
    pub const fn stage_name(&self) -> &'static str {
        "Stage04_ConnectivityMerge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextCell;

    fn default_clusters(boxes: &[BBox]) -> Vec<Cluster> {
        boxes
            .iter()
            .enumerate()
            .map(|(i, bbox)| {
                let cell = TextCell::new(i, *bbox, format!("w{i}"));
                Cluster::orphan(100 + i, ClusterLabel::Text, &cell)
            })
            .collect()
    }

    #[test]
    fn test_union_find_groups() {
        let mut uf = UnionFind::new(5);
        uf.union(3, 1);
        uf.union(4, 0);
        uf.union(1, 4);
        assert_eq!(uf.groups(), vec![vec![0, 1, 3, 4], vec![2]]);
    }

    #[test]
    fn test_far_apart_clusters_stay_separate() {
        let mut clusters = default_clusters(&[
            BBox::new(0.0, 0.0, 10.0, 5.0),
            BBox::new(20.0, 0.0, 30.0, 5.0),
            BBox::new(40.0, 0.0, 50.0, 5.0),
        ]);
        let mut ids = IdAllocator::after(clusters.iter().map(|c| c.id));

        let created = Stage04ConnectivityMerge::new().process(&mut clusters, &mut ids);
        assert_eq!(created, 0);
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn test_touching_clusters_merge() {
        let mut clusters = default_clusters(&[
            BBox::new(0.0, 0.0, 10.0, 5.0),
            BBox::new(10.5, 0.0, 20.5, 5.0),
            BBox::new(21.0, 0.0, 31.0, 5.0),
        ]);
        let mut ids = IdAllocator::after(clusters.iter().map(|c| c.id));

        let created = Stage04ConnectivityMerge::new().process(&mut clusters, &mut ids);
        assert_eq!(created, 1);
        assert_eq!(clusters.len(), 1);

        let merged = &clusters[0];
        assert_eq!(merged.id, 103);
        assert_eq!(merged.label, ClusterLabel::Text);
        assert_eq!(merged.provenance, Provenance::MergedCells);
        assert_eq!(merged.bbox, BBox::new(0.0, 0.0, 31.0, 5.0));
        assert_eq!(merged.cell_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_gap_of_four_bridged_gap_of_five_not() {
        // Dilation by 2 on both sides closes gaps up to 4 units
        let mut clusters = default_clusters(&[
            BBox::new(0.0, 0.0, 10.0, 5.0),
            BBox::new(14.0, 0.0, 20.0, 5.0),
            BBox::new(25.0, 0.0, 30.0, 5.0),
        ]);
        let mut ids = IdAllocator::after(clusters.iter().map(|c| c.id));

        Stage04ConnectivityMerge::new().process(&mut clusters, &mut ids);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].cell_ids, vec![2]);
        assert_eq!(clusters[1].cell_ids, vec![0, 1]);
    }

    #[test]
    fn test_only_default_clusters_take_part() {
        let mut clusters = default_clusters(&[
            BBox::new(0.0, 0.0, 10.0, 5.0),
            BBox::new(11.0, 0.0, 20.0, 5.0),
        ]);
        clusters[1].provenance = Provenance::ModelPrimary;
        let mut ids = IdAllocator::after(clusters.iter().map(|c| c.id));

        assert_eq!(Stage04ConnectivityMerge::new().process(&mut clusters, &mut ids), 0);
        assert_eq!(clusters.len(), 2);
    }
}

use std::collections::VecDeque;

use log::debug;
use nalgebra::Vector3;

use crate::bounds::Bounds;
use crate::error::{OctreeError, Result};
use crate::node::Node;
use crate::partition::Partitioner;

/// Build-time parameters.
///
/// `n_ref` is the leaf-occupancy refinement threshold, `density_factor`
/// controls the branching factor (`2^(3 * density_factor)` children per
/// split) and `over_refine_factor` the virtual sub-cell grid inside each
/// leaf (`2^(3 * over_refine_factor)` cells). `data_version` is an opaque
/// caller-managed cache tag carried through serialization untouched.
#[derive(Clone, Copy, Debug)]
pub struct BuildParams {
    pub n_ref: usize,
    /// Explicit domain bounds; when set they always take precedence over
    /// bounds computed from the input points.
    pub bounds: Option<Bounds>,
    pub over_refine_factor: u32,
    pub density_factor: u32,
    pub data_version: i64,
    /// Hard cap on the node arena. Degenerate inputs (many coincident
    /// coordinates) would otherwise subdivide without bound.
    pub max_nodes: usize,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            n_ref: 64,
            bounds: None,
            over_refine_factor: 1,
            density_factor: 1,
            data_version: 0,
            max_nodes: 1 << 22,
        }
    }
}

/// An adaptive multiway spatial tree over an in-memory point cloud.
///
/// Built once from a position buffer that is permuted in place (`idx`
/// records the permutation back to original particle ids), read-only
/// afterwards. Nodes live in a flat append-only arena linked by index;
/// arena index 0 is always the root.
#[derive(Clone, Debug, PartialEq)]
pub struct Octree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) domain: Bounds,
    pub(crate) idx: Vec<u64>,
    pub(crate) n_ref: usize,
    pub(crate) over_refine_factor: u32,
    pub(crate) density_factor: u32,
    pub(crate) data_version: i64,
}

impl Octree {
    /// Builds the tree, destructively reordering `positions` (flattened
    /// `3 * n`, row-major) in place.
    ///
    /// The arena is processed as a FIFO worklist: a node's range is fully
    /// partitioned and all of its children appended before any child is
    /// visited, so sibling subtrees touch disjoint ranges and arena slots.
    pub fn build(positions: &mut [f64], params: &BuildParams) -> Result<Self> {
        if positions.len() % 3 != 0 {
            return Err(OctreeError::Configuration(format!(
                "position buffer length {} is not a multiple of 3",
                positions.len()
            )));
        }
        if params.n_ref == 0 {
            return Err(OctreeError::Configuration(
                "n_ref must be at least 1".into(),
            ));
        }
        if params.n_ref > i32::MAX as usize {
            return Err(OctreeError::Configuration(format!(
                "n_ref {} does not fit the on-disk i32 header field",
                params.n_ref
            )));
        }
        if params.density_factor == 0 {
            return Err(OctreeError::Configuration(
                "density_factor must be at least 1".into(),
            ));
        }
        // Derived shift widths must stay below the word size.
        if 3 * params.density_factor as u64 >= usize::BITS as u64
            || 3 * params.over_refine_factor as u64 >= usize::BITS as u64
        {
            return Err(OctreeError::Configuration(format!(
                "refinement factors out of range: density_factor {}, over_refine_factor {}",
                params.density_factor, params.over_refine_factor
            )));
        }
        let domain = match params.bounds {
            Some(bounds) => bounds,
            None => Bounds::from_points(positions).ok_or_else(|| {
                OctreeError::Configuration(
                    "explicit bounds are required for an empty particle set".into(),
                )
            })?,
        };

        let num_particles = positions.len() / 3;
        let mut idx: Vec<u64> = (0..num_particles as u64).collect();
        let branching = 1usize << (3 * params.density_factor);
        let per_dim = 1usize << params.density_factor;

        let mut nodes = vec![Node {
            left_edge: domain.left_edge,
            right_edge: domain.right_edge,
            start: 0,
            end: positions.len(),
            parent: None,
            children: None,
            leaf: true,
            node_id: 0,
            leaf_id: None,
            depth: 0,
        }];
        let mut splitter = Partitioner::new(positions, &mut idx);
        let mut queue = VecDeque::new();
        queue.push_back(0usize);

        while let Some(current) = queue.pop_front() {
            let (start, end, left, right, depth) = {
                let node = &nodes[current];
                (node.start, node.end, node.left_edge, node.right_edge, node.depth)
            };
            // Leaf condition, in flattened units.
            if end - start <= branching * params.n_ref {
                continue;
            }
            if nodes.len() + branching > params.max_nodes {
                return Err(OctreeError::Allocation(format!(
                    "node arena would exceed the cap of {} at depth {}; input may be degenerate",
                    params.max_nodes, depth
                )));
            }

            let offsets = splitter.split(start, end, &Bounds::new(left, right), params.density_factor);
            let first_child = nodes.len();
            nodes[current].children = Some(first_child);
            nodes[current].leaf = false;

            let dx = (right - left) / per_dim as f64;
            for c in 0..branching {
                let (i, j, k) = (c / (per_dim * per_dim), (c / per_dim) % per_dim, c % per_dim);
                let child_left = Vector3::new(
                    left.x + i as f64 * dx.x,
                    left.y + j as f64 * dx.y,
                    left.z + k as f64 * dx.z,
                );
                let node_id = first_child + c;
                nodes.push(Node {
                    left_edge: child_left,
                    right_edge: child_left + dx,
                    start: offsets[c],
                    end: offsets[c + 1],
                    parent: Some(current),
                    children: None,
                    leaf: true,
                    node_id,
                    leaf_id: None,
                    depth: depth + 1,
                });
                queue.push_back(node_id);
            }
        }

        let tree = Self {
            nodes,
            domain,
            idx,
            n_ref: params.n_ref,
            over_refine_factor: params.over_refine_factor,
            density_factor: params.density_factor,
            data_version: params.data_version,
        };
        debug!(
            "built octree: {} nodes, {} leaves, {} particles, max depth {}",
            tree.num_octs(),
            tree.num_leaves(),
            num_particles,
            tree.max_depth()
        );
        Ok(tree)
    }

    pub fn num_octs(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.leaf).count()
    }

    pub fn num_particles(&self) -> usize {
        self.idx.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.nodes.len() * std::mem::size_of::<Node>()
    }

    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Permutation mapping reordered buffer position to original particle id.
    pub fn idx(&self) -> &[u64] {
        &self.idx
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn domain(&self) -> &Bounds {
        &self.domain
    }

    pub fn n_ref(&self) -> usize {
        self.n_ref
    }

    pub fn over_refine_factor(&self) -> u32 {
        self.over_refine_factor
    }

    pub fn density_factor(&self) -> u32 {
        self.density_factor
    }

    /// Opaque caller-managed cache tag; not a file-format version.
    pub fn data_version(&self) -> i64 {
        self.data_version
    }

    pub fn set_data_version(&mut self, data_version: i64) {
        self.data_version = data_version;
    }

    /// Children per interior node, `2^(3 * density_factor)`.
    pub fn branching_factor(&self) -> usize {
        1 << (3 * self.density_factor)
    }

    /// Virtual sub-cells per leaf, `2^(3 * over_refine_factor)`.
    pub fn cells_per_leaf(&self) -> usize {
        1 << (3 * self.over_refine_factor)
    }

    pub fn num_cells_per_dim(&self) -> usize {
        1 << self.over_refine_factor
    }

    /// (Re)assigns dense `leaf_id`s (0..num_leaves) over the arena in
    /// discovery order and clears them on interior nodes. Idempotent while
    /// the tree is unchanged; must run before any buffer indexed by
    /// `leaf_id` is filled. Returns the leaf count.
    pub fn assign_leaf_ids(&mut self) -> usize {
        let mut next = 0;
        for node in &mut self.nodes {
            node.leaf_id = if node.leaf {
                let id = next;
                next += 1;
                Some(id)
            } else {
                None
            };
        }
        next
    }

    /// Centers of all leaves, in arena discovery order. Reassigns `leaf_id`s
    /// as a side effect.
    pub fn leaf_positions(&mut self) -> impl Iterator<Item = Vector3<f64>> + '_ {
        self.assign_leaf_ids();
        self.nodes.iter().filter(|n| n.leaf).map(Node::center)
    }

    /// Centers of every sub-cell of every leaf, leaf-major then
    /// lexicographic `(i, j, k)`. Reassigns `leaf_id`s as a side effect.
    pub fn cell_positions(&mut self) -> impl Iterator<Item = Vector3<f64>> + '_ {
        self.assign_leaf_ids();
        let per_dim = self.num_cells_per_dim();
        self.nodes
            .iter()
            .filter(|n| n.leaf)
            .flat_map(move |n| cell_centers(n, per_dim))
    }
}

/// Uniformly spaced sub-cell centers of one leaf, `(i, j, k)` lexicographic
/// with k fastest.
pub(crate) fn cell_centers(node: &Node, per_dim: usize) -> impl Iterator<Item = Vector3<f64>> {
    let dx = (node.right_edge - node.left_edge) / per_dim as f64;
    let left = node.left_edge;
    (0..per_dim * per_dim * per_dim).map(move |c| {
        let (i, j, k) = (c / (per_dim * per_dim), (c / per_dim) % per_dim, c % per_dim);
        Vector3::new(
            left.x + (i as f64 + 0.5) * dx.x,
            left.y + (j as f64 + 0.5) * dx.y,
            left.z + (k as f64 + 0.5) * dx.z,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_cloud(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..3 * n).map(|_| rng.random_range(0.0..1.0)).collect()
    }

    fn unit_cube_corners() -> Vec<f64> {
        let mut positions = Vec::new();
        for c in 0..8 {
            positions.extend_from_slice(&[
                (c & 1) as f64,
                ((c >> 1) & 1) as f64,
                ((c >> 2) & 1) as f64,
            ]);
        }
        positions
    }

    #[test]
    fn corners_with_n_ref_one_yield_root_plus_eight_leaves() {
        let mut positions = unit_cube_corners();
        let params = BuildParams {
            n_ref: 1,
            ..BuildParams::default()
        };
        let tree = Octree::build(&mut positions, &params).unwrap();
        assert_eq!(tree.num_octs(), 9);
        assert_eq!(tree.num_leaves(), 8);
        assert_eq!(tree.max_depth(), 1);
        for node in tree.nodes().iter().skip(1) {
            assert!(node.leaf);
            assert_eq!(node.num_particles(), 1);
            assert_eq!(node.parent, Some(0));
        }
    }

    #[test]
    fn zero_particles_build_single_leaf_root() {
        let mut positions: Vec<f64> = Vec::new();
        let params = BuildParams {
            bounds: Some(Bounds::new(Vector3::zeros(), Vector3::repeat(1.0))),
            ..BuildParams::default()
        };
        let tree = Octree::build(&mut positions, &params).unwrap();
        assert_eq!(tree.num_octs(), 1);
        assert!(tree.nodes()[0].leaf);
        assert_eq!(tree.nodes()[0].start, 0);
        assert_eq!(tree.nodes()[0].end, 0);
    }

    #[test]
    fn zero_particles_without_bounds_is_a_configuration_error() {
        let mut positions: Vec<f64> = Vec::new();
        match Octree::build(&mut positions, &BuildParams::default()) {
            Err(OctreeError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn zero_n_ref_is_a_configuration_error() {
        let mut positions = random_cloud(10, 21);
        let params = BuildParams {
            n_ref: 0,
            ..BuildParams::default()
        };
        match Octree::build(&mut positions, &params) {
            Err(OctreeError::Configuration(msg)) => assert!(msg.contains("n_ref")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn n_ref_beyond_i32_is_a_configuration_error() {
        let mut positions = random_cloud(10, 22);
        let params = BuildParams {
            n_ref: i32::MAX as usize + 1,
            ..BuildParams::default()
        };
        match Octree::build(&mut positions, &params) {
            Err(OctreeError::Configuration(msg)) => assert!(msg.contains("n_ref")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_refinement_factors_are_a_configuration_error() {
        // 3 * 22 = 66 bits would overflow the branching-factor shift.
        let mut positions = random_cloud(10, 23);
        let params = BuildParams {
            density_factor: 22,
            ..BuildParams::default()
        };
        match Octree::build(&mut positions, &params) {
            Err(OctreeError::Configuration(msg)) => assert!(msg.contains("out of range")),
            other => panic!("expected configuration error, got {other:?}"),
        }

        let params = BuildParams {
            over_refine_factor: 22,
            ..BuildParams::default()
        };
        match Octree::build(&mut positions, &params) {
            Err(OctreeError::Configuration(msg)) => assert!(msg.contains("out of range")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn explicit_bounds_take_precedence() {
        let mut positions = random_cloud(100, 7);
        let bounds = Bounds::new(Vector3::repeat(-2.0), Vector3::repeat(2.0));
        let params = BuildParams {
            bounds: Some(bounds),
            ..BuildParams::default()
        };
        let tree = Octree::build(&mut positions, &params).unwrap();
        assert_eq!(*tree.domain(), bounds);
        assert_eq!(tree.nodes()[0].left_edge, bounds.left_edge);
    }

    #[test]
    fn child_ranges_partition_parent_exactly() {
        let mut positions = random_cloud(700, 42);
        let params = BuildParams {
            n_ref: 4,
            ..BuildParams::default()
        };
        let tree = Octree::build(&mut positions, &params).unwrap();
        let branching = tree.branching_factor();
        for node in tree.nodes() {
            let Some(first) = node.children else {
                continue;
            };
            let children = &tree.nodes()[first..first + branching];
            assert_eq!(children[0].start, node.start);
            assert_eq!(children[branching - 1].end, node.end);
            for pair in children.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            for child in children {
                assert_eq!(child.parent, Some(node.node_id));
                assert_eq!(child.depth, node.depth + 1);
            }
        }
    }

    #[test]
    fn idx_is_a_permutation_and_records_the_reorder() {
        let n = 500;
        let original = random_cloud(n, 3);
        let mut positions = original.clone();
        let params = BuildParams {
            n_ref: 2,
            ..BuildParams::default()
        };
        let tree = Octree::build(&mut positions, &params).unwrap();

        let mut seen = vec![false; n];
        for &id in tree.idx() {
            assert!(!seen[id as usize]);
            seen[id as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));

        for (i, &id) in tree.idx().iter().enumerate() {
            let id = id as usize;
            assert_eq!(positions[3 * i..3 * i + 3], original[3 * id..3 * id + 3]);
        }
    }

    #[test]
    fn leaf_particles_stay_inside_leaf_bounds() {
        let mut positions = random_cloud(400, 11);
        let params = BuildParams {
            n_ref: 2,
            ..BuildParams::default()
        };
        let tree = Octree::build(&mut positions, &params).unwrap();
        for node in tree.nodes().iter().filter(|n| n.leaf) {
            for p in positions[node.start..node.end].chunks_exact(3) {
                for axis in 0..3 {
                    assert!(node.left_edge[axis] <= p[axis] && p[axis] <= node.right_edge[axis]);
                }
            }
        }
    }

    #[test]
    fn leaf_and_cell_positions_match_counts() {
        let mut positions = random_cloud(300, 5);
        let params = BuildParams {
            n_ref: 4,
            over_refine_factor: 1,
            ..BuildParams::default()
        };
        let mut tree = Octree::build(&mut positions, &params).unwrap();
        let leaves = tree.num_leaves();
        assert_eq!(tree.leaf_positions().count(), leaves);
        assert_eq!(tree.cell_positions().count(), leaves * tree.cells_per_leaf());

        // leaf_ids are dense and in discovery order.
        let ids: Vec<usize> = tree
            .nodes()
            .iter()
            .filter(|n| n.leaf)
            .map(|n| n.leaf_id.unwrap())
            .collect();
        assert_eq!(ids, (0..leaves).collect::<Vec<_>>());
    }

    #[test]
    fn cell_positions_stay_inside_their_leaf() {
        let mut positions = random_cloud(100, 13);
        let params = BuildParams {
            n_ref: 8,
            over_refine_factor: 2,
            ..BuildParams::default()
        };
        let mut tree = Octree::build(&mut positions, &params).unwrap();
        let cells_per_leaf = tree.cells_per_leaf();
        let leaves: Vec<Node> = tree.nodes().iter().filter(|n| n.leaf).cloned().collect();
        for (c, center) in tree.cell_positions().enumerate() {
            let leaf = &leaves[c / cells_per_leaf];
            for axis in 0..3 {
                assert!(leaf.left_edge[axis] < center[axis] && center[axis] < leaf.right_edge[axis]);
            }
        }
    }

    #[test]
    fn coincident_points_hit_the_node_cap() {
        let mut positions: Vec<f64> = std::iter::repeat_n([0.5, 0.5, 0.5], 30)
            .flatten()
            .collect();
        let params = BuildParams {
            n_ref: 1,
            max_nodes: 200,
            ..BuildParams::default()
        };
        match Octree::build(&mut positions, &params) {
            Err(OctreeError::Allocation(_)) => {}
            other => panic!("expected allocation error, got {other:?}"),
        }
    }

    #[test]
    fn size_bytes_tracks_arena_length() {
        let mut positions = random_cloud(64, 1);
        let tree = Octree::build(&mut positions, &BuildParams::default()).unwrap();
        assert_eq!(
            tree.size_bytes(),
            tree.num_octs() * std::mem::size_of::<Node>()
        );
    }
}

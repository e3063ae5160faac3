use nalgebra::Vector3;

/// One cell of the flat node arena.
///
/// Parent/child links are arena indices, never references: the arena grows
/// while earlier nodes are still being scanned, so addresses are not stable
/// but positions are. `start`/`end` index the shared, destructively
/// reordered position buffer in flattened coordinate units (multiples of 3).
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub left_edge: Vector3<f64>,
    pub right_edge: Vector3<f64>,
    pub start: usize,
    pub end: usize,
    /// Arena index of the parent; `None` for the root.
    pub parent: Option<usize>,
    /// Arena index of the first child. Children are contiguous, one per
    /// sub-box of the geometric split.
    pub children: Option<usize>,
    pub leaf: bool,
    /// Stable arena position, assigned at creation and never changed.
    pub node_id: usize,
    /// Dense ordinal among leaves, recomputed on demand; `None` until
    /// assigned (or on an interior node).
    pub leaf_id: Option<usize>,
    pub depth: u32,
}

impl Node {
    pub fn num_particles(&self) -> usize {
        (self.end - self.start) / 3
    }

    pub fn center(&self) -> Vector3<f64> {
        0.5 * (self.left_edge + self.right_edge)
    }
}

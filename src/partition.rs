use nalgebra::Vector3;
use smallvec::SmallVec;

use crate::bounds::Bounds;

/// Boundary offsets produced by a geometric split: `branching_factor + 1`
/// entries, 9 in the plain-octree case.
pub type SplitOffsets = SmallVec<[usize; 9]>;

/// In-place partitioning of the shared position buffer and its parallel
/// permutation array.
///
/// All ranges are in flattened coordinate units: a particle occupies three
/// consecutive slots of `positions`, and `idx[i]` is the original id of the
/// particle currently stored at flattened offset `3 * i`.
pub struct Partitioner<'a> {
    positions: &'a mut [f64],
    idx: &'a mut [u64],
}

impl<'a> Partitioner<'a> {
    pub fn new(positions: &'a mut [f64], idx: &'a mut [u64]) -> Self {
        debug_assert_eq!(positions.len(), idx.len() * 3);
        Self { positions, idx }
    }

    fn swap_particles(&mut self, a: usize, b: usize) {
        for c in 0..3 {
            self.positions.swap(a + c, b + c);
        }
        self.idx.swap(a / 3, b / 3);
    }

    /// Hoare-style single pass over `start..end`: afterwards every particle
    /// with `coordinate[axis] < threshold` sits before the returned split
    /// offset and the rest after it. O(n), no allocation.
    pub fn partition(&mut self, start: usize, end: usize, axis: usize, threshold: f64) -> usize {
        let mut lo = start;
        let mut hi = end;
        loop {
            while lo < hi && self.positions[lo + axis] < threshold {
                lo += 3;
            }
            while lo < hi && self.positions[hi - 3 + axis] >= threshold {
                hi -= 3;
            }
            if lo >= hi {
                return lo;
            }
            hi -= 3;
            self.swap_particles(lo, hi);
            lo += 3;
        }
    }

    /// Bisects `start..end` into `2^(3 * splits_per_axis)` contiguous
    /// sub-ranges: x fully first, then y, then z, each cut at the geometric
    /// midpoint of the current sub-box edge (not the data median, so
    /// occupancy may be unbalanced). Sub-ranges come back in lexicographic
    /// `(i, j, k)` sub-box order as boundary offsets.
    pub fn split(
        &mut self,
        start: usize,
        end: usize,
        bounds: &Bounds,
        splits_per_axis: u32,
    ) -> SplitOffsets {
        let mut offsets = SplitOffsets::new();
        self.split_axis(
            start,
            end,
            bounds.left_edge,
            bounds.right_edge,
            0,
            splits_per_axis,
            splits_per_axis,
            &mut offsets,
        );
        offsets.push(end);
        offsets
    }

    #[allow(clippy::too_many_arguments)]
    fn split_axis(
        &mut self,
        start: usize,
        end: usize,
        left: Vector3<f64>,
        right: Vector3<f64>,
        axis: usize,
        remaining: u32,
        per_axis: u32,
        offsets: &mut SplitOffsets,
    ) {
        if axis == 3 {
            offsets.push(start);
            return;
        }
        if remaining == 0 {
            self.split_axis(start, end, left, right, axis + 1, per_axis, per_axis, offsets);
            return;
        }
        let mid = 0.5 * (left[axis] + right[axis]);
        let split = self.partition(start, end, axis, mid);
        let mut lower_right = right;
        lower_right[axis] = mid;
        self.split_axis(start, split, left, lower_right, axis, remaining - 1, per_axis, offsets);
        let mut upper_left = left;
        upper_left[axis] = mid;
        self.split_axis(split, end, upper_left, right, axis, remaining - 1, per_axis, offsets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn identity_idx(n: usize) -> Vec<u64> {
        (0..n as u64).collect()
    }

    #[test]
    fn partition_orders_around_threshold() {
        let mut positions = vec![
            0.9, 0.0, 0.0, //
            0.1, 0.0, 0.0, //
            0.6, 0.0, 0.0, //
            0.4, 0.0, 0.0, //
        ];
        let mut idx = identity_idx(4);
        let mut p = Partitioner::new(&mut positions, &mut idx);
        let split = p.partition(0, 12, 0, 0.5);
        assert_eq!(split, 6);
        for lower in positions[..split].chunks_exact(3) {
            assert!(lower[0] < 0.5);
        }
        for upper in positions[split..].chunks_exact(3) {
            assert!(upper[0] >= 0.5);
        }
        let mut sorted = idx.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, identity_idx(4));
    }

    #[test]
    fn partition_tracks_permutation() {
        let original = vec![
            0.9, 1.0, 2.0, //
            0.1, 3.0, 4.0, //
            0.6, 5.0, 6.0, //
        ];
        let mut positions = original.clone();
        let mut idx = identity_idx(3);
        let mut p = Partitioner::new(&mut positions, &mut idx);
        p.partition(0, 9, 0, 0.5);
        for (i, &orig) in idx.iter().enumerate() {
            let orig = orig as usize;
            assert_eq!(positions[3 * i..3 * i + 3], original[3 * orig..3 * orig + 3]);
        }
    }

    #[test]
    fn partition_handles_one_sided_ranges() {
        let mut positions = vec![0.1, 0.0, 0.0, 0.2, 0.0, 0.0];
        let mut idx = identity_idx(2);
        let mut p = Partitioner::new(&mut positions, &mut idx);
        assert_eq!(p.partition(0, 6, 0, 1.0), 6);
        assert_eq!(p.partition(0, 6, 0, 0.0), 0);
        assert_eq!(p.partition(0, 0, 0, 0.0), 0);
    }

    #[test]
    fn split_offsets_cover_range_without_gaps() {
        let mut positions = Vec::new();
        for i in 0..32 {
            let t = i as f64 / 32.0;
            positions.extend_from_slice(&[t, (t * 7.3) % 1.0, (t * 3.1) % 1.0]);
        }
        let n = positions.len() / 3;
        let mut idx = identity_idx(n);
        let end = positions.len();
        let mut p = Partitioner::new(&mut positions, &mut idx);
        let bounds = Bounds::new(Vector3::zeros(), Vector3::repeat(1.0));
        let offsets = p.split(0, end, &bounds, 1);
        assert_eq!(offsets.len(), 9);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[8], end);
        for pair in offsets.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn split_respects_sub_box_membership() {
        let mut positions = Vec::new();
        for i in 0..64 {
            positions.extend_from_slice(&[
                (i % 4) as f64 * 0.25 + 0.1,
                ((i / 4) % 4) as f64 * 0.25 + 0.1,
                (i / 16) as f64 * 0.25 + 0.1,
            ]);
        }
        let n = positions.len() / 3;
        let mut idx = identity_idx(n);
        let end = positions.len();
        let mut p = Partitioner::new(&mut positions, &mut idx);
        let bounds = Bounds::new(Vector3::zeros(), Vector3::repeat(1.0));
        let offsets = p.split(0, end, &bounds, 1);
        // Sub-range c corresponds to sub-box (i, j, k) with k fastest.
        for c in 0..8 {
            let (i, j, k) = (c / 4, (c / 2) % 2, c % 2);
            let lo = [i as f64 * 0.5, j as f64 * 0.5, k as f64 * 0.5];
            for particle in positions[offsets[c]..offsets[c + 1]].chunks_exact(3) {
                for axis in 0..3 {
                    assert!(particle[axis] >= lo[axis] && particle[axis] < lo[axis] + 0.5);
                }
            }
        }
    }
}

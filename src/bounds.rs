use nalgebra::Vector3;

/// Axis-aligned domain bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub left_edge: Vector3<f64>,
    pub right_edge: Vector3<f64>,
}

impl Bounds {
    pub fn new(left_edge: Vector3<f64>, right_edge: Vector3<f64>) -> Self {
        Self {
            left_edge,
            right_edge,
        }
    }

    /// Per-axis min/max over a flattened `3 * n` position buffer.
    ///
    /// Returns `None` for an empty buffer; callers that need bounds for an
    /// empty particle set must supply them explicitly.
    pub fn from_points(positions: &[f64]) -> Option<Self> {
        if positions.is_empty() {
            return None;
        }
        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        for p in positions.chunks_exact(3) {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(p[axis]);
                hi[axis] = hi[axis].max(p[axis]);
            }
        }
        Some(Self {
            left_edge: lo,
            right_edge: hi,
        })
    }

    pub fn center(&self) -> Vector3<f64> {
        0.5 * (self.left_edge + self.right_edge)
    }

    pub fn width(&self) -> Vector3<f64> {
        self.right_edge - self.left_edge
    }

    pub fn contains(&self, point: &Vector3<f64>) -> bool {
        (0..3).all(|axis| self.left_edge[axis] <= point[axis] && point[axis] <= self.right_edge[axis])
    }
}

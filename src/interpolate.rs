use nalgebra::Vector3;
use rayon::prelude::*;

use crate::error::{OctreeError, Result};
use crate::kernels::SmoothingKernel;
use crate::node::Node;
use crate::tree::{Octree, cell_centers};

/// Per-particle input arrays for kernel-weighted deposition.
///
/// `positions` is the flattened `3 * n` coordinate buffer; the remaining
/// slices have length `n`. Ordering does not matter (the tree is used for
/// geometry only), so callers may pass either original or reordered arrays.
#[derive(Clone, Copy, Debug)]
pub struct ParticleData<'a> {
    pub positions: &'a [f64],
    pub mass: &'a [f64],
    pub density: &'a [f64],
    pub smoothing_length: &'a [f64],
    pub field: &'a [f64],
}

impl ParticleData<'_> {
    pub fn len(&self) -> usize {
        self.mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    /// Rejects the whole call on the first invalid particle, before any
    /// scatter happens.
    fn validate(&self) -> Result<()> {
        let n = self.mass.len();
        if self.positions.len() != 3 * n
            || self.density.len() != n
            || self.smoothing_length.len() != n
            || self.field.len() != n
        {
            return Err(OctreeError::Configuration(format!(
                "particle arrays disagree on length: {} masses, {} coordinates, {} densities, {} smoothing lengths, {} field values",
                n,
                self.positions.len(),
                self.density.len(),
                self.smoothing_length.len(),
                self.field.len()
            )));
        }
        for p in 0..n {
            let h = self.smoothing_length[p];
            if !h.is_finite() || h <= 0.0 {
                return Err(OctreeError::InvalidParticle {
                    index: p,
                    reason: format!("smoothing length {h} is not finite and positive"),
                });
            }
            let rho = self.density[p];
            if !rho.is_finite() || rho <= 0.0 {
                return Err(OctreeError::InvalidParticle {
                    index: p,
                    reason: format!("density {rho} is not finite and positive"),
                });
            }
        }
        Ok(())
    }

    fn position(&self, p: usize) -> Vector3<f64> {
        Vector3::new(
            self.positions[3 * p],
            self.positions[3 * p + 1],
            self.positions[3 * p + 2],
        )
    }
}

/// Conservative axis-aligned overlap test between a node's box and the
/// smoothing sphere. This is a box-overlap heuristic, not an exact
/// sphere-box distance test: near box corners it can both under- and
/// over-include, and that behavior is part of the contract.
fn sphere_may_overlap(node: &Node, pos: &Vector3<f64>, h: f64) -> bool {
    (0..3).all(|axis| node.left_edge[axis] - pos[axis] < h && pos[axis] - node.right_edge[axis] < h)
}

/// Per-worker accumulation buffers; contributions commute, so partials are
/// summed in any order.
type Scatter = (Vec<f64>, Option<Vec<f64>>);

impl Octree {
    /// Scatter-adds each particle's kernel-weighted `field` contribution
    /// onto the sub-cell grids of every leaf its smoothing sphere may
    /// touch. `buffer` (and `buffer_density` when `use_normalization` is
    /// set) is indexed `leaf_id * cells_per_leaf + cell` and accumulated
    /// into, not overwritten.
    ///
    /// Takes `&mut self` only to refresh the dense `leaf_id` assignment; the
    /// tree itself is not modified structurally.
    pub fn interpolate(
        &mut self,
        buffer: &mut [f64],
        mut buffer_density: Option<&mut [f64]>,
        particles: &ParticleData<'_>,
        kernel_name: &str,
        use_normalization: bool,
    ) -> Result<()> {
        let kernel = SmoothingKernel::from_name(kernel_name).ok_or_else(|| {
            OctreeError::Configuration(format!("unknown smoothing kernel {kernel_name:?}"))
        })?;
        particles.validate()?;

        let num_leaves = self.assign_leaf_ids();
        let expected = num_leaves * self.cells_per_leaf();
        if buffer.len() != expected {
            return Err(OctreeError::Configuration(format!(
                "output buffer holds {} cells, tree has {expected}",
                buffer.len()
            )));
        }
        if use_normalization {
            match buffer_density.as_deref() {
                Some(b) if b.len() == expected => {}
                Some(b) => {
                    return Err(OctreeError::Configuration(format!(
                        "density buffer holds {} cells, tree has {expected}",
                        b.len()
                    )));
                }
                None => {
                    return Err(OctreeError::Configuration(
                        "normalization requested without a density buffer".into(),
                    ));
                }
            }
        }

        let tree = &*self;
        let zero = || {
            (
                vec![0.0f64; expected],
                use_normalization.then(|| vec![0.0f64; expected]),
            )
        };
        let (partial, partial_norm) = (0..particles.len())
            .into_par_iter()
            .fold(zero, |mut acc: Scatter, p| {
                tree.deposit_particle(p, particles, kernel, &mut acc);
                acc
            })
            .reduce(zero, |mut a, b| {
                for (x, y) in a.0.iter_mut().zip(&b.0) {
                    *x += y;
                }
                if let (Some(an), Some(bn)) = (a.1.as_mut(), b.1.as_ref()) {
                    for (x, y) in an.iter_mut().zip(bn) {
                        *x += y;
                    }
                }
                a
            });

        for (out, add) in buffer.iter_mut().zip(&partial) {
            *out += add;
        }
        if let (Some(out), Some(add)) = (buffer_density.as_deref_mut(), partial_norm.as_ref()) {
            for (o, a) in out.iter_mut().zip(add) {
                *o += a;
            }
        }
        Ok(())
    }

    fn deposit_particle(
        &self,
        p: usize,
        particles: &ParticleData<'_>,
        kernel: SmoothingKernel,
        acc: &mut Scatter,
    ) {
        let pos = particles.position(p);
        let h = particles.smoothing_length[p];
        // m / rho / h^3, the per-volume weight shared by both buffers.
        let weight = particles.mass[p] / particles.density[p] / (h * h * h);
        let prefactor = weight * particles.field[p];
        self.deposit_node(0, &pos, h, prefactor, weight, kernel, acc);
    }

    #[allow(clippy::too_many_arguments)]
    fn deposit_node(
        &self,
        node_idx: usize,
        pos: &Vector3<f64>,
        h: f64,
        prefactor: f64,
        prefactor_norm: f64,
        kernel: SmoothingKernel,
        acc: &mut Scatter,
    ) {
        let node = &self.nodes[node_idx];
        if let Some(first) = node.children {
            for child_idx in first..first + self.branching_factor() {
                if sphere_may_overlap(&self.nodes[child_idx], pos, h) {
                    self.deposit_node(child_idx, pos, h, prefactor, prefactor_norm, kernel, acc);
                }
            }
            return;
        }
        let Some(leaf_id) = node.leaf_id else {
            return;
        };
        let base = leaf_id * self.cells_per_leaf();
        for (cell, center) in cell_centers(node, self.num_cells_per_dim()).enumerate() {
            let q = (center - pos).norm() / h;
            let w = kernel.evaluate(q);
            if w == 0.0 {
                continue;
            }
            acc.0[base + cell] += prefactor * w;
            if let Some(norm) = acc.1.as_mut() {
                norm[base + cell] += prefactor_norm * w;
            }
        }
    }
}

//! Adaptive multiway spatial indexing for in-memory 3-D particle clouds.
//!
//! An octree generalized to a configurable branching factor is built by
//! destructive in-place bisection of a flattened position buffer; the
//! resulting flat node arena supports range-pruned kernel-weighted
//! deposition of per-particle quantities onto a structured sub-grid of
//! cells, and round-trips exactly through a stable binary on-disk format.
//!
//! Build the tree with [`Octree::build`], enumerate leaf or sub-cell
//! centers, scatter smoothed fields with [`Octree::interpolate`], and
//! persist with [`Octree::save`]/[`Octree::load`]. Input ordering is never
//! assumed; an upstream Morton/Hilbert pre-sort only improves locality.

pub mod bounds;
pub mod error;
pub mod interpolate;
mod io;
pub mod kernels;
pub mod node;
pub mod partition;
pub mod tree;

pub use bounds::Bounds;
pub use error::{OctreeError, Result};
pub use interpolate::ParticleData;
pub use kernels::SmoothingKernel;
pub use node::Node;
pub use tree::{BuildParams, Octree};

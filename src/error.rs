use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OctreeError>;

#[derive(Debug, thiserror::Error)]
pub enum OctreeError {
    /// A required parameter is missing or inconsistent (bounds, buffer
    /// sizes, kernel name, file path).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The node arena would exceed available memory or the configured
    /// node-count cap.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// A serialized tree could not be decoded: truncated stream, header or
    /// record-count mismatch, or a node record whose id does not match its
    /// file position.
    #[error("corrupt octree file: {0}")]
    CorruptFile(String),

    /// A particle handed to interpolation carries a non-finite, zero, or
    /// negative smoothing length or density. The whole call is rejected.
    #[error("invalid particle {index}: {reason}")]
    InvalidParticle { index: usize, reason: String },

    /// Never raised by this crate. Upstream space-filling-curve encoders
    /// (Morton/Hilbert pre-sorts) report points outside their fixed-precision
    /// index range with this variant.
    #[error("domain overflow: {0}")]
    DomainOverflow(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

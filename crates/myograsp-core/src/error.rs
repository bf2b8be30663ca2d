//! Error types for the Myograsp pipeline
//!
//! All errors are designed to work in `no_std` environments and carry enough
//! context for debugging without heap allocation. Queue-full and window-drop
//! conditions are deliberately NOT errors: they are expected degradation
//! under transient overload and are surfaced through counters only.

use core::fmt;

use serde::Serialize;

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors raised by the streaming signal path.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum PipelineError {
    /// The acquisition collaborator stopped delivering samples
    AcquisitionTimeout {
        /// Timeout that elapsed, in milliseconds
        timeout_ms: u32,
    },
    /// Incoming sample channel count does not match the session configuration
    BufferUnderrun {
        /// Channels expected by the configuration
        expected: u8,
        /// Channels carried by the sample
        got: u8,
    },
    /// A fixed buffer was asked to hold more data than its capacity
    BufferOverflow {
        /// Bytes or elements required
        required: usize,
        /// Bytes or elements available
        available: usize,
    },
    /// A fixed-capacity container bound was violated
    CapacityExceeded {
        /// What ran out of room ("features", "channels", ...)
        kind: &'static str,
        /// Requested count
        got: usize,
        /// Maximum allowed
        max: usize,
    },
    /// Session configuration is inconsistent
    InvalidConfig {
        /// Description of the issue
        reason: &'static str,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquisitionTimeout { timeout_ms } => {
                write!(f, "Acquisition timeout after {timeout_ms}ms")
            }
            Self::BufferUnderrun { expected, got } => {
                write!(f, "Channel count mismatch: expected {expected}, got {got}")
            }
            Self::BufferOverflow { required, available } => {
                write!(f, "Buffer overflow: need {required}, have {available}")
            }
            Self::CapacityExceeded { kind, got, max } => {
                write!(f, "Capacity exceeded for {kind}: {got} > {max}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {reason}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PipelineError {}

#[cfg(feature = "defmt")]
impl defmt::Format for PipelineError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::AcquisitionTimeout { timeout_ms } => {
                defmt::write!(f, "Acq timeout: {}ms", timeout_ms);
            }
            Self::BufferUnderrun { expected, got } => {
                defmt::write!(f, "Channels: {} != {}", got, expected);
            }
            Self::BufferOverflow { required, available } => {
                defmt::write!(f, "Overflow: {} > {}", required, available);
            }
            Self::CapacityExceeded { kind, got, max } => {
                defmt::write!(f, "{}: {} > {}", kind, got, max);
            }
            Self::InvalidConfig { reason } => {
                defmt::write!(f, "Config: {}", reason);
            }
        }
    }
}

// ============================================================================
// Model Errors
// ============================================================================

/// Structural defects detected while decoding a serialized model.
///
/// Any of these means the blob must be rejected outright; a model that fails
/// validation is never partially installed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum MalformedReason {
    /// Magic bytes did not match the model format
    BadMagic {
        /// The four bytes that were read
        got: [u8; 4],
    },
    /// Format version is not understood by this loader
    UnsupportedVersion {
        /// Version byte in the blob
        got: u8,
        /// Version this loader implements
        expected: u8,
    },
    /// Blob ended before the declared content
    Truncated {
        /// Bytes required by the declared counts
        expected: usize,
        /// Bytes actually present
        got: usize,
    },
    /// Model declares zero trees, features, or classes
    Empty,
    /// A tree's root index is outside its node array
    RootOutOfRange {
        /// Tree index
        tree: u8,
        /// Declared root index
        root: u8,
        /// Declared node count
        n_nodes: u8,
    },
    /// An internal node's child index is outside the node array
    ChildOutOfRange {
        /// Tree index
        tree: u8,
        /// Node index holding the bad reference
        node: u8,
        /// The out-of-range child index
        child: u8,
        /// Declared node count
        n_nodes: u8,
    },
    /// An internal node references a feature beyond the declared count
    FeatureOutOfRange {
        /// Tree index
        tree: u8,
        /// Node index holding the bad reference
        node: u8,
        /// The out-of-range feature index
        feature: u8,
        /// Declared feature count
        n_features: u8,
    },
    /// A leaf's class label is beyond the declared class count
    ClassOutOfRange {
        /// Tree index
        tree: u8,
        /// Node index holding the bad label
        node: u8,
        /// The out-of-range class label
        class: u8,
        /// Declared class count
        n_classes: u8,
    },
    /// Tree depth exceeds the traversal bound
    DepthExceeded {
        /// Tree index
        tree: u8,
        /// Maximum allowed depth
        max_depth: u8,
    },
    /// A node is reachable through more than one path (cycle or DAG)
    SharedNode {
        /// Tree index
        tree: u8,
        /// Node index reached twice
        node: u8,
    },
}

/// Errors from loading, validating or serializing an ensemble model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ModelError {
    /// The blob is structurally invalid
    Malformed(MalformedReason),
    /// A declared count exceeds a hard model bound
    CapacityExceeded {
        /// Which bound was violated ("trees", "nodes", "features", "classes")
        kind: &'static str,
        /// Declared count
        got: usize,
        /// Maximum allowed
        max: usize,
    },
    /// Output buffer too small for serialization
    BufferTooSmall {
        /// Bytes required
        required: usize,
        /// Bytes available
        available: usize,
    },
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { got } => {
                write!(
                    f,
                    "bad magic: {:02X} {:02X} {:02X} {:02X}",
                    got[0], got[1], got[2], got[3]
                )
            }
            Self::UnsupportedVersion { got, expected } => {
                write!(f, "unsupported format version {got} (loader speaks {expected})")
            }
            Self::Truncated { expected, got } => {
                write!(f, "truncated blob: {got}/{expected} bytes")
            }
            Self::Empty => write!(f, "model declares no trees, features or classes"),
            Self::RootOutOfRange { tree, root, n_nodes } => {
                write!(f, "tree {tree}: root {root} >= node count {n_nodes}")
            }
            Self::ChildOutOfRange { tree, node, child, n_nodes } => {
                write!(f, "tree {tree} node {node}: child {child} >= node count {n_nodes}")
            }
            Self::FeatureOutOfRange { tree, node, feature, n_features } => {
                write!(f, "tree {tree} node {node}: feature {feature} >= feature count {n_features}")
            }
            Self::ClassOutOfRange { tree, node, class, n_classes } => {
                write!(f, "tree {tree} node {node}: class {class} >= class count {n_classes}")
            }
            Self::DepthExceeded { tree, max_depth } => {
                write!(f, "tree {tree}: depth exceeds bound {max_depth}")
            }
            Self::SharedNode { tree, node } => {
                write!(f, "tree {tree}: node {node} reachable twice")
            }
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed model: {reason}"),
            Self::CapacityExceeded { kind, got, max } => {
                write!(f, "model capacity exceeded for {kind}: {got} > {max}")
            }
            Self::BufferTooSmall { required, available } => {
                write!(f, "serialization buffer too small: need {required}, have {available}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ModelError {}

#[cfg(feature = "defmt")]
impl defmt::Format for ModelError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Malformed(_) => defmt::write!(f, "malformed model"),
            Self::CapacityExceeded { kind, got, max } => {
                defmt::write!(f, "{}: {} > {}", kind, got, max);
            }
            Self::BufferTooSmall { required, available } => {
                defmt::write!(f, "buf: {} > {}", required, available);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Serialized ensemble model format.
//!
//! The blob layout is a byte-stable contract between the offline trainer and
//! this loader; it only changes together with the format version byte.
//!
//! ```text
//! Header (8 bytes):
//!   magic "MGRF" | version u8 | n_trees u8 | n_features u8 | n_classes u8
//! Normalization tables:
//!   n_features × scale  (i16 LE, Q8.8)
//!   n_features × offset (i16 LE, Q8.8)
//! Per tree:
//!   n_nodes u8 | root u8
//!   n_nodes × node (8 bytes):
//!     feature_idx u8 | node_type u8 | threshold i16 LE (Q8.8)
//!     | left u8 | right u8 | padding 2 × 0x00
//! ```
//!
//! The `node_type` byte packs the leaf flag in bit 7; bits 0-6 carry the
//! class label for leaves and are reserved for internal nodes. In memory the
//! distinction becomes a tagged variant; the packed byte exists only at this
//! boundary.
//!
//! Decoding validates everything before returning: a rejected model leaves
//! no partial state anywhere.

use crate::error::{MalformedReason, ModelError};
use crate::features::MAX_FEATURES;
use crate::forest::{DecisionNode, DecisionTree, Ensemble, MAX_CLASSES, MAX_NODES, MAX_TREES};
use crate::types::Fixed8_8;

/// Model file magic bytes.
pub const MODEL_MAGIC: [u8; 4] = *b"MGRF";

/// Format version this loader implements.
pub const FORMAT_VERSION: u8 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Serialized node size in bytes.
pub const NODE_SIZE: usize = 8;

/// Leaf flag in the node type byte.
const NODE_LEAF_FLAG: u8 = 0x80;

/// Class label mask in the node type byte.
const NODE_CLASS_MASK: u8 = 0x7F;

/// Largest possible encoded model (full trees, full tables).
pub const MAX_ENCODED_SIZE: usize =
    HEADER_SIZE + 4 * MAX_FEATURES + MAX_TREES * (2 + MAX_NODES * NODE_SIZE);

/// Encoded size of a specific ensemble in bytes.
#[must_use]
pub fn encoded_size(ensemble: &Ensemble) -> usize {
    let mut size = HEADER_SIZE + 4 * ensemble.n_features as usize;
    for tree in &ensemble.trees[..ensemble.n_trees as usize] {
        size += 2 + tree.n_nodes as usize * NODE_SIZE;
    }
    size
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize an ensemble into `buffer`, returning the bytes written.
///
/// The ensemble is validated first so that a malformed in-memory model can
/// never produce a loadable blob.
///
/// # Errors
///
/// Returns the ensemble's validation error, or
/// [`ModelError::BufferTooSmall`] when `buffer` cannot hold the blob.
pub fn encode(ensemble: &Ensemble, buffer: &mut [u8]) -> Result<usize, ModelError> {
    ensemble.validate()?;

    let required = encoded_size(ensemble);
    if buffer.len() < required {
        return Err(ModelError::BufferTooSmall {
            required,
            available: buffer.len(),
        });
    }

    buffer[0..4].copy_from_slice(&MODEL_MAGIC);
    buffer[4] = FORMAT_VERSION;
    buffer[5] = ensemble.n_trees;
    buffer[6] = ensemble.n_features;
    buffer[7] = ensemble.n_classes;
    let mut offset = HEADER_SIZE;

    for i in 0..ensemble.n_features as usize {
        buffer[offset..offset + 2].copy_from_slice(&ensemble.scale[i].to_raw().to_le_bytes());
        offset += 2;
    }
    for i in 0..ensemble.n_features as usize {
        buffer[offset..offset + 2].copy_from_slice(&ensemble.offset[i].to_raw().to_le_bytes());
        offset += 2;
    }

    for tree in &ensemble.trees[..ensemble.n_trees as usize] {
        buffer[offset] = tree.n_nodes;
        buffer[offset + 1] = tree.root;
        offset += 2;

        for node in &tree.nodes[..tree.n_nodes as usize] {
            let (feature_idx, node_type, threshold, left, right) = match *node {
                DecisionNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => (feature, 0x00, threshold, left, right),
                DecisionNode::Leaf { class } => {
                    (0, NODE_LEAF_FLAG | (class & NODE_CLASS_MASK), Fixed8_8::ZERO, 0, 0)
                }
            };

            buffer[offset] = feature_idx;
            buffer[offset + 1] = node_type;
            buffer[offset + 2..offset + 4].copy_from_slice(&threshold.to_raw().to_le_bytes());
            buffer[offset + 4] = left;
            buffer[offset + 5] = right;
            buffer[offset + 6] = 0;
            buffer[offset + 7] = 0;
            offset += NODE_SIZE;
        }
    }

    Ok(offset)
}

// ============================================================================
// Decoding
// ============================================================================

/// Parse and fully validate a serialized ensemble.
///
/// # Errors
///
/// Returns [`ModelError::Malformed`] or [`ModelError::CapacityExceeded`] for
/// any structural defect; on error nothing is installed.
pub fn decode(bytes: &[u8]) -> Result<Ensemble, ModelError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ModelError::Malformed(MalformedReason::Truncated {
            expected: HEADER_SIZE,
            got: bytes.len(),
        }));
    }

    if bytes[0..4] != MODEL_MAGIC {
        return Err(ModelError::Malformed(MalformedReason::BadMagic {
            got: [bytes[0], bytes[1], bytes[2], bytes[3]],
        }));
    }
    if bytes[4] != FORMAT_VERSION {
        return Err(ModelError::Malformed(MalformedReason::UnsupportedVersion {
            got: bytes[4],
            expected: FORMAT_VERSION,
        }));
    }

    let n_trees = bytes[5];
    let n_features = bytes[6];
    let n_classes = bytes[7];

    if n_trees as usize > MAX_TREES {
        return Err(ModelError::CapacityExceeded {
            kind: "trees",
            got: n_trees as usize,
            max: MAX_TREES,
        });
    }
    if n_features as usize > MAX_FEATURES {
        return Err(ModelError::CapacityExceeded {
            kind: "features",
            got: n_features as usize,
            max: MAX_FEATURES,
        });
    }
    if n_classes as usize > MAX_CLASSES {
        return Err(ModelError::CapacityExceeded {
            kind: "classes",
            got: n_classes as usize,
            max: MAX_CLASSES,
        });
    }
    if n_trees == 0 || n_features == 0 || n_classes == 0 {
        return Err(ModelError::Malformed(MalformedReason::Empty));
    }

    let mut cursor = Cursor::new(bytes, HEADER_SIZE);

    let mut scale = [Fixed8_8::ZERO; MAX_FEATURES];
    for entry in scale.iter_mut().take(n_features as usize) {
        *entry = Fixed8_8::from_raw(cursor.read_i16()?);
    }
    let mut offset = [Fixed8_8::ZERO; MAX_FEATURES];
    for entry in offset.iter_mut().take(n_features as usize) {
        *entry = Fixed8_8::from_raw(cursor.read_i16()?);
    }

    let mut trees = [DecisionTree::empty(); MAX_TREES];
    for tree in trees.iter_mut().take(n_trees as usize) {
        let n_nodes = cursor.read_u8()?;
        let root = cursor.read_u8()?;

        if n_nodes as usize > MAX_NODES {
            return Err(ModelError::CapacityExceeded {
                kind: "nodes",
                got: n_nodes as usize,
                max: MAX_NODES,
            });
        }

        tree.n_nodes = n_nodes;
        tree.root = root;

        for node in tree.nodes.iter_mut().take(n_nodes as usize) {
            let feature_idx = cursor.read_u8()?;
            let node_type = cursor.read_u8()?;
            let threshold = Fixed8_8::from_raw(cursor.read_i16()?);
            let left = cursor.read_u8()?;
            let right = cursor.read_u8()?;
            cursor.skip(2)?; // padding

            *node = if node_type & NODE_LEAF_FLAG != 0 {
                DecisionNode::Leaf {
                    class: node_type & NODE_CLASS_MASK,
                }
            } else {
                DecisionNode::Internal {
                    feature: feature_idx,
                    threshold,
                    left,
                    right,
                }
            };
        }
    }

    let ensemble = Ensemble {
        trees,
        n_trees,
        n_features,
        n_classes,
        scale,
        offset,
    };

    // Index, depth and reachability checks happen on the assembled model so
    // a defect anywhere rejects the whole blob.
    ensemble.validate()?;

    Ok(ensemble)
}

/// Bounds-checked byte reader.
struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8], position: usize) -> Self {
        Self { bytes, position }
    }

    fn read_u8(&mut self) -> Result<u8, ModelError> {
        self.check(1)?;
        let value = self.bytes[self.position];
        self.position += 1;
        Ok(value)
    }

    fn read_i16(&mut self) -> Result<i16, ModelError> {
        self.check(2)?;
        let value = i16::from_le_bytes([self.bytes[self.position], self.bytes[self.position + 1]]);
        self.position += 2;
        Ok(value)
    }

    fn skip(&mut self, count: usize) -> Result<(), ModelError> {
        self.check(count)?;
        self.position += count;
        Ok(())
    }

    fn check(&self, need: usize) -> Result<(), ModelError> {
        if self.position + need > self.bytes.len() {
            return Err(ModelError::Malformed(MalformedReason::Truncated {
                expected: self.position + need,
                got: self.bytes.len(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ensemble() -> Ensemble {
        let mut tree = DecisionTree::empty();
        tree.nodes[0] = DecisionNode::Internal {
            feature: 2,
            threshold: Fixed8_8::from_f32(1.25),
            left: 1,
            right: 2,
        };
        tree.nodes[1] = DecisionNode::Leaf { class: 0 };
        tree.nodes[2] = DecisionNode::Internal {
            feature: 5,
            threshold: Fixed8_8::from_f32(-0.75),
            left: 3,
            right: 4,
        };
        tree.nodes[3] = DecisionNode::Leaf { class: 2 };
        tree.nodes[4] = DecisionNode::Leaf { class: 1 };
        tree.n_nodes = 5;
        tree.root = 0;

        let mut scale = [Fixed8_8::ZERO; MAX_FEATURES];
        let mut offset = [Fixed8_8::ZERO; MAX_FEATURES];
        for i in 0..8 {
            scale[i] = Fixed8_8::from_f32(0.1 * (i + 1) as f32);
            offset[i] = Fixed8_8::from_f32(-0.5 + 0.25 * i as f32);
        }

        let mut trees = [DecisionTree::empty(); MAX_TREES];
        trees[0] = tree;
        trees[1] = tree;
        trees[2] = DecisionTree::empty();

        Ensemble {
            trees,
            n_trees: 3,
            n_features: 8,
            n_classes: 3,
            scale,
            offset,
        }
    }

    #[test]
    fn test_round_trip() {
        let original = sample_ensemble();
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&original, &mut buffer).unwrap();
        assert_eq!(written, encoded_size(&original));
        assert!(written < 32 * 1024);

        let decoded = decode(&buffer[..written]).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_header_is_byte_stable() {
        let ensemble = sample_ensemble();
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        encode(&ensemble, &mut buffer).unwrap();

        assert_eq!(&buffer[0..4], b"MGRF");
        assert_eq!(buffer[4], FORMAT_VERSION);
        assert_eq!(buffer[5], 3);
        assert_eq!(buffer[6], 8);
        assert_eq!(buffer[7], 3);
    }

    #[test]
    fn test_leaf_flag_packing() {
        let ensemble = sample_ensemble();
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        encode(&ensemble, &mut buffer).unwrap();

        // Tree 0, node 1 is Leaf{0}; node 3 is Leaf{2}.
        let nodes_start = HEADER_SIZE + 4 * 8 + 2;
        assert_eq!(buffer[nodes_start + NODE_SIZE + 1], 0x80);
        assert_eq!(buffer[nodes_start + 3 * NODE_SIZE + 1], 0x82);
    }

    #[test]
    fn test_reject_bad_magic() {
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&sample_ensemble(), &mut buffer).unwrap();
        buffer[0] = b'X';
        assert!(matches!(
            decode(&buffer[..written]),
            Err(ModelError::Malformed(MalformedReason::BadMagic { .. }))
        ));
    }

    #[test]
    fn test_reject_bad_version() {
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&sample_ensemble(), &mut buffer).unwrap();
        buffer[4] = 9;
        assert!(matches!(
            decode(&buffer[..written]),
            Err(ModelError::Malformed(MalformedReason::UnsupportedVersion { got: 9, .. }))
        ));
    }

    #[test]
    fn test_reject_too_many_trees() {
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&sample_ensemble(), &mut buffer).unwrap();
        buffer[5] = (MAX_TREES + 1) as u8;
        assert!(matches!(
            decode(&buffer[..written]),
            Err(ModelError::CapacityExceeded { kind: "trees", .. })
        ));
    }

    #[test]
    fn test_reject_node_count_over_bound() {
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&sample_ensemble(), &mut buffer).unwrap();
        // First tree header directly follows the normalization tables.
        let tree_header = HEADER_SIZE + 4 * 8;
        buffer[tree_header] = (MAX_NODES + 1) as u8;
        assert!(matches!(
            decode(&buffer[..written]),
            Err(ModelError::CapacityExceeded { kind: "nodes", .. })
        ));
    }

    #[test]
    fn test_reject_child_out_of_range() {
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&sample_ensemble(), &mut buffer).unwrap();
        // Corrupt tree 0 node 0's left child to 200.
        let node0 = HEADER_SIZE + 4 * 8 + 2;
        buffer[node0 + 4] = 200;
        assert!(matches!(
            decode(&buffer[..written]),
            Err(ModelError::Malformed(MalformedReason::ChildOutOfRange { child: 200, .. }))
        ));
    }

    #[test]
    fn test_reject_truncated() {
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        let written = encode(&sample_ensemble(), &mut buffer).unwrap();
        assert!(matches!(
            decode(&buffer[..written - 10]),
            Err(ModelError::Malformed(MalformedReason::Truncated { .. }))
        ));
        assert!(matches!(
            decode(&buffer[..4]),
            Err(ModelError::Malformed(MalformedReason::Truncated { .. }))
        ));
    }

    #[test]
    fn test_encode_rejects_invalid_ensemble() {
        let mut ensemble = sample_ensemble();
        ensemble.trees[0].root = 60;
        let mut buffer = [0u8; MAX_ENCODED_SIZE];
        assert!(matches!(
            encode(&ensemble, &mut buffer),
            Err(ModelError::Malformed(MalformedReason::RootOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let ensemble = sample_ensemble();
        let mut buffer = [0u8; 16];
        assert!(matches!(
            encode(&ensemble, &mut buffer),
            Err(ModelError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_max_model_fits_flash_budget() {
        // The largest encodable model stays under the 32 KB flash budget.
        assert!(MAX_ENCODED_SIZE < 32 * 1024);
    }
}

//! Fixed-point decision-tree ensemble inference.
//!
//! The ensemble is loaded once from a serialized blob, validated in full, and
//! is immutable afterwards; it may be read concurrently without
//! synchronization. Traversal is iterative with a hard depth bound and fails
//! closed: a corrupted index yields class 0 with zero confidence instead of
//! an out-of-bounds read. A missed gesture is recoverable; a wild read is
//! not.

use serde::{Deserialize, Serialize};

use crate::error::{MalformedReason, ModelError};
use crate::features::{FeatureVector, MAX_FEATURES};
use crate::types::Fixed8_8;

/// Maximum trees per ensemble.
pub const MAX_TREES: usize = 15;

/// Maximum nodes per tree.
pub const MAX_NODES: usize = 63;

/// Maximum gesture classes.
pub const MAX_CLASSES: usize = 29;

/// Maximum traversal depth (levels from root to leaf).
pub const MAX_DEPTH: usize = 6;

// ============================================================================
// Nodes and Trees
// ============================================================================

/// One decision-tree node.
///
/// The serialized format packs the leaf flag into a type byte; in memory the
/// distinction is a tagged variant so that traversal cannot confuse a class
/// label with a child index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecisionNode {
    /// Split node: branch left when `feature[feature] <= threshold`
    Internal {
        /// Index into the normalized feature vector
        feature: u8,
        /// Q8.8 split threshold
        threshold: Fixed8_8,
        /// Node index of the left subtree
        left: u8,
        /// Node index of the right subtree
        right: u8,
    },
    /// Terminal node carrying a gesture class label
    Leaf {
        /// Gesture class
        class: u8,
    },
}

impl Default for DecisionNode {
    fn default() -> Self {
        Self::Leaf { class: 0 }
    }
}

/// One decision tree over normalized fixed-point features.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecisionTree {
    /// Node storage; only the first `n_nodes` entries are valid
    pub nodes: [DecisionNode; MAX_NODES],
    /// Number of valid nodes
    pub n_nodes: u8,
    /// Root node index
    pub root: u8,
}

impl DecisionTree {
    /// An empty single-leaf tree voting class 0.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            nodes: [DecisionNode::Leaf { class: 0 }; MAX_NODES],
            n_nodes: 1,
            root: 0,
        }
    }

    /// Traverse iteratively from the root; `None` means the traversal hit a
    /// structural anomaly (out-of-range index or depth overrun) and the
    /// caller must fail closed.
    #[must_use]
    pub fn predict(&self, features: &[Fixed8_8; MAX_FEATURES]) -> Option<u8> {
        let n_nodes = self.n_nodes as usize;
        let mut index = self.root as usize;

        // A valid tree reaches a leaf within MAX_DEPTH hops; anything longer
        // is corruption (or a cycle) and must not keep walking.
        for _ in 0..=MAX_DEPTH {
            if index >= n_nodes {
                return None;
            }
            match self.nodes[index] {
                DecisionNode::Leaf { class } => return Some(class),
                DecisionNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let feature = feature as usize;
                    if feature >= MAX_FEATURES {
                        return None;
                    }
                    index = if features[feature] <= threshold {
                        left as usize
                    } else {
                        right as usize
                    };
                }
            }
        }

        None
    }
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Classification Result
// ============================================================================

/// One classification outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Winning gesture class
    pub class: u8,
    /// Confidence in percent (0-100)
    pub confidence: u8,
    /// Timestamp of the source window, in microseconds
    pub timestamp_us: u64,
}

impl Classification {
    /// The fail-closed result: class 0, zero confidence.
    #[inline]
    #[must_use]
    pub const fn rejected(timestamp_us: u64) -> Self {
        Self {
            class: 0,
            confidence: 0,
            timestamp_us,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Classification {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "class {} ({}%)", self.class, self.confidence);
    }
}

// ============================================================================
// Ensemble
// ============================================================================

/// Decision-tree forest with per-feature normalization tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ensemble {
    /// Trees; only the first `n_trees` entries are valid
    pub trees: [DecisionTree; MAX_TREES],
    /// Number of valid trees
    pub n_trees: u8,
    /// Features consumed per prediction
    pub n_features: u8,
    /// Gesture classes produced
    pub n_classes: u8,
    /// Per-feature normalization scale (Q8.8)
    pub scale: [Fixed8_8; MAX_FEATURES],
    /// Per-feature normalization offset (Q8.8)
    pub offset: [Fixed8_8; MAX_FEATURES],
}

impl Ensemble {
    /// Normalize raw features into the classifier's fixed-point domain.
    ///
    /// Per feature: `(value - offset) * scale`, with round-half-up on the
    /// final right-shift of the multiply. Scales are precomputed reciprocals
    /// from training; no division happens at inference time. Features beyond
    /// `n_features` are zeroed.
    #[must_use]
    pub fn normalize(&self, raw: &FeatureVector) -> [Fixed8_8; MAX_FEATURES] {
        let mut normalized = [Fixed8_8::ZERO; MAX_FEATURES];
        let count = (self.n_features as usize).min(raw.len);
        for i in 0..count {
            let value = Fixed8_8::from_f32(raw.values[i]);
            normalized[i] = value.saturating_sub(self.offset[i]).mul_round(self.scale[i]);
        }
        normalized
    }

    /// Classify one normalized feature vector.
    ///
    /// Every tree votes with its leaf class; the winning class is the vote
    /// argmax with ties broken toward the lower class index, and confidence
    /// is `floor(100 * winning_votes / n_trees)`. Any structural anomaly
    /// found mid-traversal fails the whole prediction closed.
    #[must_use]
    pub fn predict(
        &self,
        features: &[Fixed8_8; MAX_FEATURES],
        timestamp_us: u64,
    ) -> Classification {
        let n_trees = self.n_trees as usize;
        if n_trees == 0 {
            return Classification::rejected(timestamp_us);
        }

        let mut votes = [0u8; MAX_CLASSES];
        for tree in &self.trees[..n_trees] {
            let Some(class) = tree.predict(features) else {
                return Classification::rejected(timestamp_us);
            };
            if class >= self.n_classes || (class as usize) >= MAX_CLASSES {
                return Classification::rejected(timestamp_us);
            }
            votes[class as usize] += 1;
        }

        // Argmax with ties to the lowest class index: strict comparison on a
        // forward scan keeps the first maximum.
        let mut winner = 0usize;
        let mut winning_votes = votes[0];
        for (class, &count) in votes.iter().enumerate().take(self.n_classes as usize) {
            if count > winning_votes {
                winner = class;
                winning_votes = count;
            }
        }

        Classification {
            class: winner as u8,
            confidence: (100 * u32::from(winning_votes) / n_trees as u32) as u8,
            timestamp_us,
        }
    }

    /// Convenience: normalize then predict.
    #[must_use]
    pub fn classify(&self, raw: &FeatureVector) -> Classification {
        let normalized = self.normalize(raw);
        self.predict(&normalized, raw.timestamp_us)
    }

    /// Validate every structural invariant of the loaded model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::CapacityExceeded`] when a declared count is over
    /// a hard bound and [`ModelError::Malformed`] for any index, depth or
    /// reachability violation. A model failing validation must never be
    /// installed.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_trees as usize > MAX_TREES {
            return Err(ModelError::CapacityExceeded {
                kind: "trees",
                got: self.n_trees as usize,
                max: MAX_TREES,
            });
        }
        if self.n_features as usize > MAX_FEATURES {
            return Err(ModelError::CapacityExceeded {
                kind: "features",
                got: self.n_features as usize,
                max: MAX_FEATURES,
            });
        }
        if self.n_classes as usize > MAX_CLASSES {
            return Err(ModelError::CapacityExceeded {
                kind: "classes",
                got: self.n_classes as usize,
                max: MAX_CLASSES,
            });
        }
        if self.n_trees == 0 || self.n_features == 0 || self.n_classes == 0 {
            return Err(ModelError::Malformed(MalformedReason::Empty));
        }

        for (tree_idx, tree) in self.trees[..self.n_trees as usize].iter().enumerate() {
            let tree_idx = tree_idx as u8;
            let n_nodes = tree.n_nodes as usize;

            if n_nodes > MAX_NODES {
                return Err(ModelError::CapacityExceeded {
                    kind: "nodes",
                    got: n_nodes,
                    max: MAX_NODES,
                });
            }
            if tree.root as usize >= n_nodes {
                return Err(ModelError::Malformed(MalformedReason::RootOutOfRange {
                    tree: tree_idx,
                    root: tree.root,
                    n_nodes: tree.n_nodes,
                }));
            }

            self.validate_tree(tree_idx, tree)?;
        }

        Ok(())
    }

    /// Breadth-first walk from the root checking indices, reachability and
    /// depth. The visited bitmask doubles as cycle detection: a node reached
    /// twice means the "tree" is a DAG or a loop.
    fn validate_tree(&self, tree_idx: u8, tree: &DecisionTree) -> Result<(), ModelError> {
        let n_nodes = tree.n_nodes as usize;

        // (node index, depth) frontier; a tree has at most MAX_NODES entries.
        let mut frontier: heapless::Vec<(u8, u8), MAX_NODES> = heapless::Vec::new();
        let mut visited: u64 = 0;

        frontier.push((tree.root, 0)).ok();
        visited |= 1 << tree.root;

        while let Some((index, depth)) = frontier.pop() {
            if depth as usize >= MAX_DEPTH {
                // An internal node at the depth bound cannot reach a leaf.
                if matches!(tree.nodes[index as usize], DecisionNode::Internal { .. }) {
                    return Err(ModelError::Malformed(MalformedReason::DepthExceeded {
                        tree: tree_idx,
                        max_depth: MAX_DEPTH as u8,
                    }));
                }
            }

            match tree.nodes[index as usize] {
                DecisionNode::Leaf { class } => {
                    if class >= self.n_classes {
                        return Err(ModelError::Malformed(MalformedReason::ClassOutOfRange {
                            tree: tree_idx,
                            node: index,
                            class,
                            n_classes: self.n_classes,
                        }));
                    }
                }
                DecisionNode::Internal {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if feature >= self.n_features {
                        return Err(ModelError::Malformed(
                            MalformedReason::FeatureOutOfRange {
                                tree: tree_idx,
                                node: index,
                                feature,
                                n_features: self.n_features,
                            },
                        ));
                    }
                    for child in [left, right] {
                        if child as usize >= n_nodes {
                            return Err(ModelError::Malformed(
                                MalformedReason::ChildOutOfRange {
                                    tree: tree_idx,
                                    node: index,
                                    child,
                                    n_nodes: tree.n_nodes,
                                },
                            ));
                        }
                        let bit = 1u64 << child;
                        if visited & bit != 0 {
                            return Err(ModelError::Malformed(MalformedReason::SharedNode {
                                tree: tree_idx,
                                node: child,
                            }));
                        }
                        visited |= bit;
                        frontier.push((child, depth + 1)).ok();
                    }
                }
            }
        }

        Ok(())
    }

    /// Serialized size of this model in bytes (flash footprint).
    #[must_use]
    pub fn flash_bytes(&self) -> usize {
        crate::model::encoded_size(self)
    }

    /// Approximate RAM needed for inference over this model.
    #[must_use]
    pub fn ram_bytes(&self) -> usize {
        // Normalized feature buffer + vote tally + traversal cursor.
        MAX_FEATURES * core::mem::size_of::<Fixed8_8>()
            + MAX_CLASSES
            + core::mem::size_of::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-class stump ensemble: each tree splits on feature 0 at 0.5.
    fn stump_ensemble(n_trees: u8) -> Ensemble {
        let mut tree = DecisionTree::empty();
        tree.nodes[0] = DecisionNode::Internal {
            feature: 0,
            threshold: Fixed8_8::from_f32(0.5),
            left: 1,
            right: 2,
        };
        tree.nodes[1] = DecisionNode::Leaf { class: 0 };
        tree.nodes[2] = DecisionNode::Leaf { class: 1 };
        tree.n_nodes = 3;
        tree.root = 0;

        let mut scale = [Fixed8_8::ZERO; MAX_FEATURES];
        scale[..4].fill(Fixed8_8::ONE);
        Ensemble {
            trees: [tree; MAX_TREES],
            n_trees,
            n_features: 4,
            n_classes: 2,
            scale,
            offset: [Fixed8_8::ZERO; MAX_FEATURES],
        }
    }

    fn features_with(value: f32) -> [Fixed8_8; MAX_FEATURES] {
        let mut f = [Fixed8_8::ZERO; MAX_FEATURES];
        f[0] = Fixed8_8::from_f32(value);
        f
    }

    #[test]
    fn test_stump_prediction() {
        let ensemble = stump_ensemble(5);

        let low = ensemble.predict(&features_with(0.25), 0);
        assert_eq!(low.class, 0);
        assert_eq!(low.confidence, 100);

        let high = ensemble.predict(&features_with(0.75), 0);
        assert_eq!(high.class, 1);
        assert_eq!(high.confidence, 100);
    }

    #[test]
    fn test_boundary_goes_left() {
        // feature <= threshold branches left.
        let ensemble = stump_ensemble(3);
        let result = ensemble.predict(&features_with(0.5), 0);
        assert_eq!(result.class, 0);
    }

    #[test]
    fn test_zero_features_never_panic() {
        let ensemble = stump_ensemble(MAX_TREES as u8);
        let result = ensemble.predict(&[Fixed8_8::ZERO; MAX_FEATURES], 0);
        assert!(result.class < ensemble.n_classes);
        assert!(result.confidence <= 100);
    }

    #[test]
    fn test_confidence_partial_agreement() {
        // 2 of 3 trees vote class 1: floor(100 * 2 / 3) = 66.
        let mut ensemble = stump_ensemble(3);
        ensemble.trees[2].nodes[0] = DecisionNode::Leaf { class: 0 };
        ensemble.trees[2].n_nodes = 1;

        let result = ensemble.predict(&features_with(0.75), 0);
        assert_eq!(result.class, 1);
        assert_eq!(result.confidence, 66);
    }

    #[test]
    fn test_tie_break_lowest_class() {
        // One tree votes class 0, one votes class 1: tie resolves to 0.
        let mut ensemble = stump_ensemble(2);
        ensemble.trees[0].nodes[0] = DecisionNode::Leaf { class: 0 };
        ensemble.trees[0].n_nodes = 1;
        ensemble.trees[1].nodes[0] = DecisionNode::Leaf { class: 1 };
        ensemble.trees[1].n_nodes = 1;

        for _ in 0..10 {
            let result = ensemble.predict(&features_with(0.9), 0);
            assert_eq!(result.class, 0);
            assert_eq!(result.confidence, 50);
        }
    }

    #[test]
    fn test_corrupt_child_fails_closed() {
        let mut ensemble = stump_ensemble(3);
        // Corrupt one child index past the node count after "load".
        ensemble.trees[1].nodes[0] = DecisionNode::Internal {
            feature: 0,
            threshold: Fixed8_8::ZERO,
            left: 60,
            right: 2,
        };

        let result = ensemble.predict(&features_with(-1.0), 77);
        assert_eq!(result, Classification::rejected(77));
    }

    #[test]
    fn test_normalization_round_half_up() {
        let mut ensemble = stump_ensemble(1);
        ensemble.scale[0] = Fixed8_8::from_raw(129); // ≈ 0.50390625
        ensemble.offset[0] = Fixed8_8::ZERO;

        let mut raw = FeatureVector::new(0);
        raw.push(0.5).unwrap();
        let normalized = ensemble.normalize(&raw);

        // 128 * 129 = 16512 -> 64.5 after the shift, rounds up to 65.
        assert_eq!(normalized[0].to_raw(), 65);
    }

    #[test]
    fn test_validate_accepts_good_model() {
        let ensemble = stump_ensemble(5);
        assert!(ensemble.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_child() {
        let mut ensemble = stump_ensemble(2);
        ensemble.trees[0].nodes[0] = DecisionNode::Internal {
            feature: 0,
            threshold: Fixed8_8::ZERO,
            left: 1,
            right: 9, // only 3 nodes declared
        };
        assert!(matches!(
            ensemble.validate(),
            Err(ModelError::Malformed(MalformedReason::ChildOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_feature() {
        let mut ensemble = stump_ensemble(2);
        ensemble.trees[0].nodes[0] = DecisionNode::Internal {
            feature: 25, // n_features is 4
            threshold: Fixed8_8::ZERO,
            left: 1,
            right: 2,
        };
        assert!(matches!(
            ensemble.validate(),
            Err(ModelError::Malformed(MalformedReason::FeatureOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let mut ensemble = stump_ensemble(1);
        // Node 2 points back at the root.
        ensemble.trees[0].nodes[2] = DecisionNode::Internal {
            feature: 0,
            threshold: Fixed8_8::ZERO,
            left: 0,
            right: 1,
        };
        assert!(matches!(
            ensemble.validate(),
            Err(ModelError::Malformed(MalformedReason::SharedNode { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let mut ensemble = stump_ensemble(1);
        ensemble.n_classes = 0;
        assert!(matches!(
            ensemble.validate(),
            Err(ModelError::Malformed(MalformedReason::Empty))
        ));
    }
}

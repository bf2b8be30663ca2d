//! Confidence-weighted temporal voting.
//!
//! A single misclassified window must not twitch the hand. The voter keeps
//! the last few classifications and hands downstream only the class whose
//! summed confidence dominates the buffer.

use serde::{Deserialize, Serialize};

use crate::forest::{Classification, MAX_CLASSES};

/// Classifications retained for voting.
pub const VOTE_DEPTH: usize = 3;

/// One buffered vote.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Predicted gesture class
    pub class: u8,
    /// Confidence in percent
    pub confidence: u8,
}

/// Outcome of a majority vote.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    /// Winning gesture class
    pub class: u8,
    /// Combined confidence in percent (0-100)
    pub confidence: u8,
}

/// Ring buffer of recent classifications with confidence-weighted majority.
#[derive(Copy, Clone, Debug, Default)]
pub struct TemporalVoter {
    records: [VoteRecord; VOTE_DEPTH],
    write_idx: u8,
    count: u8,
}

impl TemporalVoter {
    /// Create an empty voter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: [VoteRecord {
                class: 0,
                confidence: 0,
            }; VOTE_DEPTH],
            write_idx: 0,
            count: 0,
        }
    }

    /// Insert a classification, overwriting the oldest once full.
    pub fn add(&mut self, classification: &Classification) {
        self.records[self.write_idx as usize] = VoteRecord {
            class: classification.class,
            confidence: classification.confidence,
        };
        self.write_idx = (self.write_idx + 1) % VOTE_DEPTH as u8;
        if (self.count as usize) < VOTE_DEPTH {
            self.count += 1;
        }
    }

    /// Confidence-weighted majority over the buffered classifications.
    ///
    /// The winner is the class with the highest summed confidence, ties to
    /// the lowest class index. The combined confidence is the winner's
    /// confidence mass averaged over the buffer occupancy (truncating), so
    /// three unanimous 90% votes read back as 90%, and a class backed by
    /// only part of the buffer is discounted accordingly. An empty buffer
    /// yields class 0 with zero confidence.
    #[must_use]
    pub fn majority(&self) -> VoteResult {
        let mut totals = [0u32; MAX_CLASSES];

        for record in &self.records[..self.count as usize] {
            if (record.class as usize) < MAX_CLASSES {
                totals[record.class as usize] += u32::from(record.confidence);
            }
        }

        if self.count == 0 {
            return VoteResult {
                class: 0,
                confidence: 0,
            };
        }

        // Strict comparison on a forward scan keeps the lowest tied class.
        let mut winner = 0usize;
        let mut winner_total = totals[0];
        for (class, &total) in totals.iter().enumerate() {
            if total > winner_total {
                winner = class;
                winner_total = total;
            }
        }

        VoteResult {
            class: winner as u8,
            confidence: (winner_total / u32::from(self.count)) as u8,
        }
    }

    /// Number of buffered classifications.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// True when no classifications are buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Discard all buffered classifications (pipeline reset).
    pub fn reset(&mut self) {
        self.write_idx = 0;
        self.count = 0;
    }
}

//! Myograsp Core - `no_std` compatible sEMG gesture recognition pipeline
//!
//! This crate provides the signal path of the Myograsp prosthetic-hand
//! controller: sliding-window assembly, causal filtering, spectral and
//! time-domain feature extraction, fixed-point random-forest inference, and
//! temporal vote smoothing. It is designed to run on heap-less embedded
//! targets as well as in `std` host environments.
//!
//! # Modules
//!
//! - [`types`]: Core data types (fixed-point, channels, samples, results)
//! - [`error`]: Error types for the pipeline and the model loader
//! - [`config`]: Session configuration and validation
//! - [`window`]: Overlapping sample windower
//! - [`filter`]: Per-channel high-pass and powerline-notch filter bank
//! - [`spectral`]: Hamming window, fixed-size FFT, magnitude spectrum
//! - [`features`]: Time- and frequency-domain feature extraction
//! - [`forest`]: Fixed-point decision-tree ensemble inference
//! - [`model`]: Serialized model format (load/store)
//! - [`vote`]: Confidence-weighted temporal voting
//! - [`queue`]: Bounded drop-oldest window queue
//! - [`stats`]: Shared pipeline telemetry counters
//!
//! # Features
//!
//! - `std`: Enable standard library support
//! - `defmt`: Enable `defmt` formatting for embedded logging
//!
//! # Example
//!
//! ```rust
//! use myograsp_core::types::{EmgSample, Fixed8_8};
//! use myograsp_core::window::SampleWindower;
//!
//! let mut windower = SampleWindower::new(4);
//! let sample = EmgSample::new(1_000, 4, 0);
//! let emitted = windower.push(&sample).unwrap();
//! assert!(emitted.is_none()); // 255 more samples until the first window
//!
//! let threshold = Fixed8_8::from_f32(1.5);
//! assert!((threshold.to_f32() - 1.5).abs() < 0.004);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod error;
pub mod features;
pub mod filter;
pub mod forest;
pub mod model;
pub mod queue;
pub mod spectral;
pub mod stats;
pub mod types;
pub mod vote;
pub mod window;

// Re-export commonly used types at crate root
pub use config::PipelineConfig;
pub use error::{ModelError, PipelineError};
pub use features::{FeatureExtractor, FeatureLayout, FeatureVector};
pub use filter::FilterBank;
pub use forest::{Classification, DecisionNode, DecisionTree, Ensemble};
pub use queue::WindowQueue;
pub use spectral::SpectralAnalyzer;
pub use stats::{PipelineStats, StatsSnapshot};
pub use types::{EmgChannel, EmgSample, Fixed8_8};
pub use vote::TemporalVoter;
pub use window::{SampleWindower, Window};

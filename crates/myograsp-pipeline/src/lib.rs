//! Myograsp Pipeline - Async coordination of the gesture recognition core
//!
//! This crate threads the core's processing stages into a bounded-latency
//! producer/consumer chain on top of tokio:
//!
//! - an ingest stage filtering each raw sample once and assembling windows,
//! - a DSP stage extracting feature vectors from completed windows,
//! - an inference stage running ensemble prediction and temporal voting,
//! - an actuation handoff gated on vote confidence.
//!
//! Queues between stages are small and fixed-capacity. When the DSP stage
//! falls behind, the oldest unconsumed window is dropped and counted:
//! correctness policy is "most recent wins", because a skipped inference
//! cycle is recoverable and growing latency is not. The sampling side never
//! blocks on downstream slowness.
//!
//! # Modules
//!
//! - [`coordinator`]: Task spawning, queues, cycle state machine, reset
//! - [`monitor`]: Read-only observability snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod coordinator;
pub mod monitor;

pub use coordinator::{Pipeline, PipelineBuildError, PipelineHandle, RunMode};
pub use monitor::{Monitor, MonitorSnapshot};

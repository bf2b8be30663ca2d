//! Shared pipeline telemetry.
//!
//! One explicit shared-state object instead of free-floating globals: every
//! field is either an atomic counter (incremented by exactly one stage) or
//! an atomic gauge (overwritten by exactly one stage), so the monitor can
//! read concurrently without locks. Queue-full and window-drop conditions
//! surface here and only here.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Pipeline cycle state, advanced by whichever stage completes work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CycleState {
    /// Waiting for a window to complete
    Idle = 0,
    /// A window has been queued for processing
    WindowReady = 1,
    /// The window's filtered data is in the DSP stage
    Filtered = 2,
    /// Feature extraction finished
    FeaturesExtracted = 3,
    /// Ensemble inference finished
    Classified = 4,
    /// Temporal vote tallied
    Voted = 5,
    /// A confident vote was forwarded to actuation
    ActuationIssued = 6,
}

impl CycleState {
    /// Decode from the stored byte (unknown values read as `Idle`).
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WindowReady,
            2 => Self::Filtered,
            3 => Self::FeaturesExtracted,
            4 => Self::Classified,
            5 => Self::Voted,
            6 => Self::ActuationIssued,
            _ => Self::Idle,
        }
    }

    /// Human-readable state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WindowReady => "window-ready",
            Self::Filtered => "filtered",
            Self::FeaturesExtracted => "features-extracted",
            Self::Classified => "classified",
            Self::Voted => "voted",
            Self::ActuationIssued => "actuation-issued",
        }
    }
}

/// Lock-free telemetry shared between the pipeline stages and the monitor.
#[derive(Debug, Default)]
pub struct PipelineStats {
    samples_in: AtomicU32,
    dropped_samples: AtomicU32,
    windows_emitted: AtomicU32,
    dropped_windows: AtomicU32,
    dropped_features: AtomicU32,
    predictions: AtomicU32,
    actuations: AtomicU32,
    feature_extract_us: AtomicU32,
    inference_us: AtomicU32,
    cycle_state: AtomicU8,
}

impl PipelineStats {
    /// Create zeroed telemetry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples_in: AtomicU32::new(0),
            dropped_samples: AtomicU32::new(0),
            windows_emitted: AtomicU32::new(0),
            dropped_windows: AtomicU32::new(0),
            dropped_features: AtomicU32::new(0),
            predictions: AtomicU32::new(0),
            actuations: AtomicU32::new(0),
            feature_extract_us: AtomicU32::new(0),
            inference_us: AtomicU32::new(0),
            cycle_state: AtomicU8::new(CycleState::Idle as u8),
        }
    }

    /// Count one accepted sample.
    #[inline]
    pub fn record_sample(&self) {
        self.samples_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one sample dropped at the acquisition boundary.
    #[inline]
    pub fn record_dropped_sample(&self) {
        self.dropped_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one emitted window.
    #[inline]
    pub fn record_window(&self) {
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one window displaced from the full queue.
    #[inline]
    pub fn record_dropped_window(&self) {
        self.dropped_windows.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one feature vector dropped on a full downstream channel.
    #[inline]
    pub fn record_dropped_features(&self) {
        self.dropped_features.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one completed prediction.
    #[inline]
    pub fn record_prediction(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one confident vote forwarded to actuation.
    #[inline]
    pub fn record_actuation(&self) {
        self.actuations.fetch_add(1, Ordering::Relaxed);
    }

    /// Store the latest feature-extraction duration.
    #[inline]
    pub fn set_feature_extract_us(&self, micros: u32) {
        self.feature_extract_us.store(micros, Ordering::Relaxed);
    }

    /// Store the latest inference duration.
    #[inline]
    pub fn set_inference_us(&self, micros: u32) {
        self.inference_us.store(micros, Ordering::Relaxed);
    }

    /// Advance the cycle state machine.
    #[inline]
    pub fn set_cycle_state(&self, state: CycleState) {
        self.cycle_state.store(state as u8, Ordering::Relaxed);
    }

    /// Current cycle state.
    #[inline]
    #[must_use]
    pub fn cycle_state(&self) -> CycleState {
        CycleState::from_u8(self.cycle_state.load(Ordering::Relaxed))
    }

    /// Windows displaced from the queue so far.
    #[inline]
    #[must_use]
    pub fn dropped_windows(&self) -> u32 {
        self.dropped_windows.load(Ordering::Relaxed)
    }

    /// Samples dropped at the acquisition boundary so far.
    #[inline]
    #[must_use]
    pub fn dropped_samples(&self) -> u32 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Completed predictions so far.
    #[inline]
    #[must_use]
    pub fn predictions(&self) -> u32 {
        self.predictions.load(Ordering::Relaxed)
    }

    /// Consistent point-in-time copy for the monitor.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            dropped_windows: self.dropped_windows.load(Ordering::Relaxed),
            dropped_features: self.dropped_features.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            actuations: self.actuations.load(Ordering::Relaxed),
            feature_extract_us: self.feature_extract_us.load(Ordering::Relaxed),
            inference_us: self.inference_us.load(Ordering::Relaxed),
            cycle_state: self.cycle_state(),
        }
    }
}

/// Plain copy of the telemetry for reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Samples accepted from the acquisition collaborator
    pub samples_in: u32,
    /// Samples dropped at the acquisition boundary
    pub dropped_samples: u32,
    /// Windows completed by the windower
    pub windows_emitted: u32,
    /// Windows displaced from the full queue
    pub dropped_windows: u32,
    /// Feature vectors dropped on a full downstream channel
    pub dropped_features: u32,
    /// Completed predictions
    pub predictions: u32,
    /// Confident votes forwarded to actuation
    pub actuations: u32,
    /// Latest feature-extraction duration in microseconds
    pub feature_extract_us: u32,
    /// Latest inference duration in microseconds
    pub inference_us: u32,
    /// Cycle state at snapshot time
    pub cycle_state: CycleState,
}

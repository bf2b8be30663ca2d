//! Read-only observability for external monitors.
//!
//! The monitor sees per-cycle timing, drop counters and the last few
//! classification results. It cannot influence the pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use myograsp_core::forest::Classification;
use myograsp_core::stats::{PipelineStats, StatsSnapshot};

/// Classification results retained for the monitor.
pub const RECENT_DEPTH: usize = 8;

/// Cloneable read-only handle onto a running pipeline's telemetry.
#[derive(Clone)]
pub struct Monitor {
    stats: Arc<PipelineStats>,
    recent: Arc<Mutex<VecDeque<Classification>>>,
}

impl Monitor {
    pub(crate) fn new(
        stats: Arc<PipelineStats>,
        recent: Arc<Mutex<VecDeque<Classification>>>,
    ) -> Self {
        Self { stats, recent }
    }

    /// Point-in-time copy of all observable pipeline state.
    #[must_use]
    pub fn snapshot(&self) -> MonitorSnapshot {
        let recent = self
            .recent
            .lock()
            .map(|recent| recent.iter().copied().collect())
            .unwrap_or_default();

        MonitorSnapshot {
            stats: self.stats.snapshot(),
            recent,
        }
    }
}

/// Everything a monitoring collaborator may observe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// Counters, timing gauges and cycle state
    pub stats: StatsSnapshot,
    /// Most recent classifications, oldest first
    pub recent: Vec<Classification>,
}

impl MonitorSnapshot {
    /// The newest classification, if any cycles have completed.
    #[must_use]
    pub fn last_classification(&self) -> Option<&Classification> {
        self.recent.last()
    }
}

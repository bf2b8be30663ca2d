//! Pipeline coordinator: tasks, queues, drop policy and cycle state.
//!
//! Three tasks carry the signal path:
//!
//! 1. **ingest** - consumes raw samples from the acquisition channel, runs
//!    the persistent filter bank once per sample, and assembles windows.
//!    Completed windows go into the drop-oldest window queue.
//! 2. **dsp** - pops windows and extracts feature vectors.
//! 3. **inference** - classifies, feeds the temporal voter, and posts
//!    confident votes to the actuation channel.
//!
//! Handoff between stages is ownership transfer through a bounded queue;
//! no stage shares mutable working state with another. The loaded ensemble
//! is immutable and shared read-only.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use myograsp_core::config::PipelineConfig;
use myograsp_core::error::{ModelError, PipelineError};
use myograsp_core::features::{FeatureExtractor, FeatureVector};
use myograsp_core::filter::FilterBank;
use myograsp_core::forest::{Classification, Ensemble};
use myograsp_core::queue::WindowQueue;
use myograsp_core::stats::{CycleState, PipelineStats};
use myograsp_core::types::EmgSample;
use myograsp_core::vote::TemporalVoter;
use myograsp_core::window::SampleWindower;

use crate::monitor::{Monitor, RECENT_DEPTH};

/// Capacity of the raw sample channel.
///
/// Sized for a few milliseconds of slack at 1 kHz; the acquisition side
/// drops (and counts) rather than blocking when it fills.
const SAMPLE_QUEUE_DEPTH: usize = 64;

/// Capacity of the window queue (drop-oldest on overflow).
const WINDOW_QUEUE_DEPTH: usize = 2;

/// Capacity of the feature channel.
const FEATURE_QUEUE_DEPTH: usize = 2;

/// Capacity of the actuation output channel.
const ACTUATION_QUEUE_DEPTH: usize = 8;

// ============================================================================
// Errors
// ============================================================================

/// Errors constructing a pipeline.
#[derive(Debug, Error)]
pub enum PipelineBuildError {
    /// Session configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(PipelineError),

    /// The ensemble failed structural validation and was not installed
    #[error("model rejected: {0}")]
    Model(ModelError),

    /// The model was trained for a different feature layout
    #[error("feature count mismatch: model expects {model}, session produces {session}")]
    FeatureCountMismatch {
        /// Features the model consumes
        model: usize,
        /// Features the session layout produces
        session: usize,
    },
}

// ============================================================================
// Run Mode
// ============================================================================

/// Whether the pipeline is processing or idling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Samples flow through all stages
    Active,
    /// Incoming samples are ignored; queues drain and stage state resets
    Idle,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Pipeline factory.
pub struct Pipeline;

impl Pipeline {
    /// Validate the configuration and model, then spawn the stage tasks.
    ///
    /// Returns the control handle and the actuation channel carrying
    /// confident gesture commands. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineBuildError`] when the configuration is
    /// inconsistent, the model fails validation, or the model's feature
    /// count does not match the session layout. A rejected model is never
    /// installed.
    pub fn spawn(
        config: PipelineConfig,
        ensemble: Ensemble,
    ) -> Result<(PipelineHandle, mpsc::Receiver<Classification>), PipelineBuildError> {
        config.validate().map_err(PipelineBuildError::Config)?;
        ensemble.validate().map_err(PipelineBuildError::Model)?;

        let session_features = config.feature_count();
        if ensemble.n_features as usize != session_features {
            return Err(PipelineBuildError::FeatureCountMismatch {
                model: ensemble.n_features as usize,
                session: session_features,
            });
        }

        let ensemble = Arc::new(ensemble);
        let stats = Arc::new(PipelineStats::new());
        let recent = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_DEPTH)));

        let (sample_tx, sample_rx) = mpsc::channel::<EmgSample>(SAMPLE_QUEUE_DEPTH);
        let (feature_tx, feature_rx) = mpsc::channel::<FeatureVector>(FEATURE_QUEUE_DEPTH);
        let (actuation_tx, actuation_rx) = mpsc::channel::<Classification>(ACTUATION_QUEUE_DEPTH);
        let (mode_tx, mode_rx) = watch::channel(RunMode::Active);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let window_queue = Arc::new(Mutex::new(WindowQueue::<WINDOW_QUEUE_DEPTH>::new()));
        let window_ready = Arc::new(Notify::new());

        info!(
            channels = config.channels,
            sample_rate_hz = config.sample_rate_hz,
            layout = config.layout.name(),
            trees = ensemble.n_trees,
            classes = ensemble.n_classes,
            flash_bytes = ensemble.flash_bytes(),
            "starting pipeline"
        );

        let ingest = tokio::spawn(ingest_task(
            sample_rx,
            FilterBank::new(&config),
            SampleWindower::new(config.channels),
            Arc::clone(&window_queue),
            Arc::clone(&window_ready),
            mode_rx.clone(),
            Arc::clone(&stats),
        ));

        let dsp = tokio::spawn(dsp_task(
            Arc::clone(&window_queue),
            Arc::clone(&window_ready),
            FeatureExtractor::new(&config),
            feature_tx,
            shutdown_rx,
            Arc::clone(&stats),
        ));

        let inference = tokio::spawn(inference_task(
            feature_rx,
            Arc::clone(&ensemble),
            actuation_tx,
            mode_rx,
            config.vote_gate_percent,
            Arc::clone(&stats),
            Arc::clone(&recent),
        ));

        let handle = PipelineHandle {
            sample_tx,
            mode_tx,
            shutdown_tx,
            monitor: Monitor::new(Arc::clone(&stats), recent),
            stats,
            tasks: vec![ingest, dsp, inference],
        };
        Ok((handle, actuation_rx))
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    sample_tx: mpsc::Sender<EmgSample>,
    mode_tx: watch::Sender<RunMode>,
    shutdown_tx: watch::Sender<bool>,
    monitor: Monitor,
    stats: Arc<PipelineStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Offer one sample to the pipeline without blocking.
    ///
    /// Returns `false` when the sample channel is full; the sample is
    /// dropped and counted. The acquisition side's timing integrity always
    /// outranks a missed inference cycle.
    pub fn push_sample(&self, sample: EmgSample) -> bool {
        match self.sample_tx.try_send(sample) {
            Ok(()) => true,
            Err(_) => {
                self.stats.record_dropped_sample();
                false
            }
        }
    }

    /// Switch between active processing and idle.
    ///
    /// Entering idle drains all queues and resets filter, windower and
    /// voter state, so no window ever spans a start/stop discontinuity.
    pub fn set_mode(&self, mode: RunMode) {
        let _ = self.mode_tx.send(mode);
    }

    /// Read-only observability handle.
    #[must_use]
    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    /// Shared telemetry.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Stop all stage tasks and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.sample_tx);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("pipeline task panicked: {e}");
            }
        }
        info!("pipeline stopped");
    }
}

// ============================================================================
// Stage Tasks
// ============================================================================

/// Highest-priority stage: filter each raw sample exactly once and slide
/// the window. Never blocks on downstream; a full window queue displaces
/// its oldest entry.
async fn ingest_task(
    mut sample_rx: mpsc::Receiver<EmgSample>,
    mut filter_bank: FilterBank,
    mut windower: SampleWindower,
    window_queue: Arc<Mutex<WindowQueue<WINDOW_QUEUE_DEPTH>>>,
    window_ready: Arc<Notify>,
    mut mode_rx: watch::Receiver<RunMode>,
    stats: Arc<PipelineStats>,
) {
    loop {
        tokio::select! {
            changed = mode_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if *mode_rx.borrow() == RunMode::Idle {
                    // Drain and reset: post-reset windows must not mix with
                    // pre-reset samples, and filter transients must not leak
                    // across the discontinuity.
                    let drained = window_queue.lock().map_or(0, |mut queue| queue.clear());
                    filter_bank.reset();
                    windower.reset();
                    stats.set_cycle_state(CycleState::Idle);
                    debug!(drained, "pipeline idled; stage state reset");
                }
            }
            sample = sample_rx.recv() => {
                let Some(mut sample) = sample else { break };
                if *mode_rx.borrow() == RunMode::Idle {
                    continue;
                }

                stats.record_sample();
                if let Err(e) = filter_bank.process(&mut sample) {
                    warn!("sample rejected: {e}");
                    continue;
                }

                match windower.push(&sample) {
                    Ok(Some(window)) => {
                        stats.record_window();
                        let displaced = window_queue
                            .lock()
                            .ok()
                            .and_then(|mut queue| queue.push(window));
                        if displaced.is_some() {
                            // Most recent wins; the skipped cycle is only
                            // visible through this counter.
                            stats.record_dropped_window();
                            trace!("window queue full; dropped oldest");
                        }
                        stats.set_cycle_state(CycleState::WindowReady);
                        window_ready.notify_one();
                    }
                    Ok(None) => {}
                    Err(e) => warn!("windower rejected sample: {e}"),
                }
            }
        }
    }
    debug!("ingest task finished");
}

/// DSP stage: feature extraction over completed windows.
async fn dsp_task(
    window_queue: Arc<Mutex<WindowQueue<WINDOW_QUEUE_DEPTH>>>,
    window_ready: Arc<Notify>,
    extractor: FeatureExtractor,
    feature_tx: mpsc::Sender<FeatureVector>,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<PipelineStats>,
) {
    loop {
        let window = window_queue.lock().ok().and_then(|mut queue| queue.pop());

        let Some(window) = window else {
            tokio::select! {
                () = window_ready.notified() => continue,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
        };

        stats.set_cycle_state(CycleState::Filtered);
        let started = Instant::now();
        match extractor.extract(&window) {
            Ok(features) => {
                stats.set_feature_extract_us(started.elapsed().as_micros() as u32);
                stats.set_cycle_state(CycleState::FeaturesExtracted);
                if feature_tx.try_send(features).is_err() {
                    stats.record_dropped_features();
                    trace!("feature channel full; dropped vector");
                }
            }
            Err(e) => error!("feature extraction failed: {e}"),
        }
    }
    debug!("dsp task finished");
}

/// Inference stage: ensemble prediction, temporal voting, gated actuation.
async fn inference_task(
    mut feature_rx: mpsc::Receiver<FeatureVector>,
    ensemble: Arc<Ensemble>,
    actuation_tx: mpsc::Sender<Classification>,
    mut mode_rx: watch::Receiver<RunMode>,
    vote_gate_percent: u8,
    stats: Arc<PipelineStats>,
    recent: Arc<Mutex<VecDeque<Classification>>>,
) {
    let mut voter = TemporalVoter::new();

    loop {
        tokio::select! {
            changed = mode_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if *mode_rx.borrow() == RunMode::Idle {
                    voter.reset();
                }
            }
            features = feature_rx.recv() => {
                let Some(features) = features else { break };

                let started = Instant::now();
                let classification = ensemble.classify(&features);
                stats.set_inference_us(started.elapsed().as_micros() as u32);
                stats.set_cycle_state(CycleState::Classified);
                stats.record_prediction();

                voter.add(&classification);
                let vote = voter.majority();
                stats.set_cycle_state(CycleState::Voted);

                if let Ok(mut recent) = recent.lock() {
                    if recent.len() == RECENT_DEPTH {
                        recent.pop_front();
                    }
                    recent.push_back(classification);
                }

                trace!(
                    class = classification.class,
                    confidence = classification.confidence,
                    vote_class = vote.class,
                    vote_confidence = vote.confidence,
                    "cycle classified"
                );

                // Below the gate nothing is issued and the previous actuation
                // state persists at the collaborator.
                if vote.confidence > vote_gate_percent {
                    let command = Classification {
                        class: vote.class,
                        confidence: vote.confidence,
                        timestamp_us: classification.timestamp_us,
                    };
                    if actuation_tx.try_send(command).is_ok() {
                        stats.record_actuation();
                    }
                    stats.set_cycle_state(CycleState::ActuationIssued);
                }
                stats.set_cycle_state(CycleState::Idle);
            }
        }
    }
    debug!("inference task finished");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use myograsp_core::features::MAX_FEATURES;
    use myograsp_core::forest::{DecisionNode, DecisionTree, MAX_TREES};
    use myograsp_core::types::Fixed8_8;
    use myograsp_core::window::WINDOW_SIZE;

    /// Ensemble whose every tree is a single leaf voting `class`; matches
    /// the default session layout (4 channels, 28 features).
    fn constant_ensemble(class: u8) -> Ensemble {
        let mut tree = DecisionTree::empty();
        tree.nodes[0] = DecisionNode::Leaf { class };

        let mut scale = [Fixed8_8::ZERO; MAX_FEATURES];
        scale[..28].fill(Fixed8_8::ONE);

        Ensemble {
            trees: [tree; MAX_TREES],
            n_trees: 5,
            n_features: 28,
            n_classes: 4,
            scale,
            offset: [Fixed8_8::ZERO; MAX_FEATURES],
        }
    }

    fn sample(i: u32) -> EmgSample {
        let mut s = EmgSample::new(u64::from(i) * 1000, 4, i);
        for ch in 0..4 {
            // Deterministic band-limited content so features are non-trivial.
            s.channels[ch] = 40.0
                * (0.3 + ch as f32 * 0.2)
                * (2.0 * std::f32::consts::PI * 90.0 * i as f32 / 1000.0).sin();
        }
        s
    }

    /// Feed samples without ever losing one: retry when the channel is full.
    async fn feed(handle: &PipelineHandle, count: u32) {
        for i in 0..count {
            while !handle.push_sample(sample(i)) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            if i % 64 == 63 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_actuation() {
        let (handle, mut actuations) =
            Pipeline::spawn(PipelineConfig::default(), constant_ensemble(2)).unwrap();

        feed(&handle, 3 * WINDOW_SIZE as u32).await;

        let command = tokio::time::timeout(Duration::from_secs(5), actuations.recv())
            .await
            .expect("no actuation within timeout")
            .expect("actuation channel closed");

        assert_eq!(command.class, 2);
        assert!(command.confidence > 70);

        // Give the inference stage a moment to settle the counters.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = handle.monitor().snapshot();
        assert!(snapshot.stats.windows_emitted >= 1);
        assert!(snapshot.stats.predictions >= 1);
        assert!(snapshot.stats.actuations >= 1);
        assert_eq!(snapshot.last_classification().unwrap().class, 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_low_confidence_never_actuates() {
        // A 100% gate blocks even unanimous votes: the gate is strict.
        let config = PipelineConfig {
            vote_gate_percent: 100,
            ..PipelineConfig::default()
        };
        let (handle, mut actuations) = Pipeline::spawn(config, constant_ensemble(1)).unwrap();

        feed(&handle, 2 * WINDOW_SIZE as u32).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Predictions happened, but 100 > 100 is false: nothing issued.
        let snapshot = handle.monitor().snapshot();
        assert!(snapshot.stats.predictions >= 1);
        assert_eq!(snapshot.stats.actuations, 0);
        assert!(actuations.try_recv().is_err());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_resets_and_resumes() {
        let (handle, _actuations) =
            Pipeline::spawn(PipelineConfig::default(), constant_ensemble(0)).unwrap();

        // Partially fill a window, then idle: the partial window must not
        // survive into the next active phase.
        feed(&handle, 100).await;
        handle.set_mode(RunMode::Idle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.set_mode(RunMode::Active);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = handle.monitor().snapshot().stats.windows_emitted;

        // One short of a full post-reset window: no emission yet.
        feed(&handle, WINDOW_SIZE as u32 - 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.monitor().snapshot().stats.windows_emitted, before);

        // The final sample completes it.
        feed(&handle, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            handle.monitor().snapshot().stats.windows_emitted,
            before + 1
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_feature_count_mismatch() {
        let mut ensemble = constant_ensemble(0);
        ensemble.n_features = 12; // session produces 28

        let result = Pipeline::spawn(PipelineConfig::default(), ensemble);
        assert!(matches!(
            result,
            Err(PipelineBuildError::FeatureCountMismatch { model: 12, session: 28 })
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_model() {
        let mut ensemble = constant_ensemble(0);
        ensemble.trees[0].nodes[0] = DecisionNode::Internal {
            feature: 0,
            threshold: Fixed8_8::ZERO,
            left: 50, // out of range for a 1-node tree
            right: 0,
        };

        let result = Pipeline::spawn(PipelineConfig::default(), ensemble);
        assert!(matches!(result, Err(PipelineBuildError::Model(_))));
    }
}

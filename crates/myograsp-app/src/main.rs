//! Myograsp demo application
//!
//! Runs the gesture recognition pipeline against a simulated acquisition
//! frontend, and provides small model tools.
//!
//! # Usage
//!
//! ```bash
//! # Run with the built-in demo model for 10 seconds
//! myograsp run
//!
//! # Run a trained model blob
//! myograsp run --model hand_tsl.mgrf --duration 30
//!
//! # Show what a model blob contains
//! myograsp inspect hand_tsl.mgrf
//!
//! # Write the built-in demo model to disk
//! myograsp demo-model demo.mgrf
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use myograsp_core::config::PipelineConfig;
use myograsp_core::features::MAX_FEATURES;
use myograsp_core::forest::{DecisionNode, DecisionTree, Ensemble, MAX_TREES};
use myograsp_core::model;
use myograsp_core::types::Fixed8_8;
use myograsp_pipeline::{Pipeline, RunMode};

mod simulate;

use simulate::SignalSimulator;

/// Myograsp gesture recognition demo
#[derive(Parser, Debug)]
#[command(name = "myograsp")]
#[command(author, version, about = "sEMG gesture recognition pipeline", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline with simulated acquisition
    Run {
        /// Model blob to load; the built-in demo model when omitted
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Session duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// How long the simulator holds each gesture, in milliseconds
        #[arg(long, default_value = "2500")]
        hold_ms: u64,
    },

    /// Print the structure of a model blob
    Inspect {
        /// Model blob path
        model: PathBuf,
    },

    /// Write the built-in demo model to a file
    DemoModel {
        /// Output path
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Myograsp v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            model,
            duration,
            hold_ms,
        } => run(model, duration, hold_ms),
        Commands::Inspect { model } => inspect(&model),
        Commands::DemoModel { output } => {
            let ensemble = demo_ensemble();
            let mut buffer = vec![0u8; model::MAX_ENCODED_SIZE];
            let written = model::encode(&ensemble, &mut buffer)
                .map_err(|e| anyhow::anyhow!("demo model failed to encode: {e}"))?;
            std::fs::write(&output, &buffer[..written])?;
            info!("wrote {} bytes to {}", written, output.display());
            Ok(())
        }
    }
}

/// Load a model blob from disk, or fall back to the demo model.
fn load_model(path: Option<&Path>) -> anyhow::Result<Ensemble> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            let ensemble = model::decode(&bytes)
                .map_err(|e| anyhow::anyhow!("rejected model {}: {e}", path.display()))?;
            info!(
                "loaded model: {} trees, {} features, {} classes, {} bytes flash",
                ensemble.n_trees,
                ensemble.n_features,
                ensemble.n_classes,
                ensemble.flash_bytes()
            );
            Ok(ensemble)
        }
        None => {
            info!("no model given; using built-in demo model");
            Ok(demo_ensemble())
        }
    }
}

/// Run a simulated session.
fn run(model: Option<PathBuf>, duration_s: u64, hold_ms: u64) -> anyhow::Result<()> {
    let ensemble = load_model(model.as_deref())?;
    let config = PipelineConfig::default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;

    runtime.block_on(async move {
        let (handle, mut actuations) = Pipeline::spawn(config, ensemble)?;
        handle.set_mode(RunMode::Active);

        let mut simulator =
            SignalSimulator::new(config.sample_rate_hz, config.channels);
        let period = Duration::from_micros(1_000_000 / u64::from(config.sample_rate_hz));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

        let started = tokio::time::Instant::now();
        let session = Duration::from_secs(duration_s);
        let hold = Duration::from_millis(hold_ms);
        let mut next_switch = hold;

        info!("session running for {duration_s}s");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if elapsed >= session {
                        break;
                    }
                    if elapsed >= next_switch {
                        next_switch += hold;
                        let next = (simulator.gesture() + 1) % SignalSimulator::gesture_count();
                        simulator.set_gesture(next);
                        info!("simulator now performing gesture {next}");
                    }
                    if !handle.push_sample(simulator.next_sample()) {
                        warn!("sample dropped at acquisition boundary");
                    }
                }
                Some(command) = actuations.recv() => {
                    info!(
                        "actuation: gesture {} at {}% confidence",
                        command.class, command.confidence
                    );
                }
            }
        }

        let snapshot = handle.monitor().snapshot();
        info!("--- session report ---");
        info!("samples in:        {}", snapshot.stats.samples_in);
        info!("samples dropped:   {}", snapshot.stats.dropped_samples);
        info!("windows emitted:   {}", snapshot.stats.windows_emitted);
        info!("windows dropped:   {}", snapshot.stats.dropped_windows);
        info!("predictions:       {}", snapshot.stats.predictions);
        info!("actuations:        {}", snapshot.stats.actuations);
        info!("feature extract:   {}us", snapshot.stats.feature_extract_us);
        info!("inference:         {}us", snapshot.stats.inference_us);

        handle.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

/// Print the structure of a model blob.
fn inspect(path: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)?;
    let ensemble = model::decode(&bytes)
        .map_err(|e| anyhow::anyhow!("rejected model {}: {e}", path.display()))?;

    println!("model:      {}", path.display());
    println!("format:     v{}", model::FORMAT_VERSION);
    println!("trees:      {}", ensemble.n_trees);
    println!("features:   {}", ensemble.n_features);
    println!("classes:    {}", ensemble.n_classes);
    println!("flash:      {} bytes", ensemble.flash_bytes());
    println!("ram:        {} bytes", ensemble.ram_bytes());

    for (i, tree) in ensemble.trees[..ensemble.n_trees as usize].iter().enumerate() {
        let leaves = tree.nodes[..tree.n_nodes as usize]
            .iter()
            .filter(|n| matches!(n, DecisionNode::Leaf { .. }))
            .count();
        println!(
            "tree {i}: {} nodes ({} leaves), root {}",
            tree.n_nodes, leaves, tree.root
        );
    }

    Ok(())
}

/// Built-in demo model matched to the simulator's gesture profiles.
///
/// Each tree splits on the RMS features of the two wrist channels
/// (channel-major layout: feature 0 is channel 0 RMS, feature 7 is
/// channel 1 RMS) and separates rest / grip / open / rotation.
fn demo_ensemble() -> Ensemble {
    fn tree(threshold_uv: f32) -> DecisionTree {
        let t = Fixed8_8::from_f32(threshold_uv);
        let mut tree = DecisionTree::empty();
        tree.nodes[0] = DecisionNode::Internal {
            feature: 0, // channel 0 (flexor) RMS
            threshold: t,
            left: 1,
            right: 2,
        };
        tree.nodes[1] = DecisionNode::Internal {
            feature: 7, // channel 1 (extensor) RMS
            threshold: t,
            left: 3,
            right: 4,
        };
        tree.nodes[2] = DecisionNode::Internal {
            feature: 7,
            threshold: t,
            left: 5,
            right: 6,
        };
        tree.nodes[3] = DecisionNode::Leaf { class: 0 }; // rest
        tree.nodes[4] = DecisionNode::Leaf { class: 2 }; // open hand
        tree.nodes[5] = DecisionNode::Leaf { class: 1 }; // grip
        tree.nodes[6] = DecisionNode::Leaf { class: 3 }; // rotation
        tree.n_nodes = 7;
        tree.root = 0;
        tree
    }

    let mut trees = [DecisionTree::empty(); MAX_TREES];
    // Slightly staggered thresholds so the vote is not a single split.
    for (i, threshold) in [36.0, 38.0, 40.0, 42.0, 44.0].iter().enumerate() {
        trees[i] = tree(*threshold);
    }

    let mut scale = [Fixed8_8::ZERO; MAX_FEATURES];
    scale[..28].fill(Fixed8_8::ONE);

    Ensemble {
        trees,
        n_trees: 5,
        n_features: 28,
        n_classes: 4,
        scale,
        offset: [Fixed8_8::ZERO; MAX_FEATURES],
    }
}

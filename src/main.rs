use anyhow::Context;
use chrono::Local;
use env_logger::Builder;
use log::{LevelFilter, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;

use wsn_flood_simulator::common::config::{NetworkConfig, SimulationConfig};
use wsn_flood_simulator::common::scene::load_scene;
use wsn_flood_simulator::simulation::{FrameRecorder, Network, NullObserver, Observer, Scheduler, build_network};

fn build(config: &NetworkConfig) -> anyhow::Result<Network> {
    if let Some(scene_path) = &config.scene {
        info!("Loading scene {}", scene_path.display());
        let scene = load_scene(scene_path).with_context(|| format!("Failed to load scene {}", scene_path.display()))?;
        return Ok(scene.into_network());
    }

    let mut rng = match config.placement_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok(build_network(&config.placement(), &mut rng)?)
}

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wsn_flood_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");
    let launched = Local::now();

    let config = match std::env::args_os().nth(1) {
        Some(path) => SimulationConfig::load(Path::new(&path))?,
        None => {
            info!("No configuration file given, using defaults");
            SimulationConfig::default()
        }
    };

    info!("Generating network...");
    let mut network = build(&config.network)?;
    info!("Network with {} nodes ready", network.len());

    let source = &config.source;
    let required = source.required_replies(network.len());
    network
        .with_node(source.node, |node| {
            node.set_required_replies(required);
            node.enqueue(source.payload.as_str());
        })
        .with_context(|| format!("Source node {} is not part of the network", source.node))?;
    info!("Node {} sends {:?} and waits for {} replies", source.node, source.payload, required);

    let scheduler = Scheduler::new(config.run.settings());
    let interrupt = scheduler.interrupt();
    ctrlc::set_handler(move || {
        info!("Interrupt received, stopping the run");
        interrupt.raise();
    })
    .context("Failed to install the Ctrl-C handler")?;
    let mut recorder = FrameRecorder::new();
    let mut discard = NullObserver;
    let observer: &mut dyn Observer = if config.output.record_frames {
        &mut recorder
    } else {
        &mut discard
    };
    let report = scheduler.run(&mut network, observer).context("Simulation failed")?;

    if config.output.record_frames {
        let run_dir = config.output.directory.join(launched.format("%Y-%m-%d_%H%M%S").to_string());
        fs::create_dir_all(&run_dir).with_context(|| format!("Failed to create {}", run_dir.display()))?;
        recorder.save(&run_dir.join("frames.jsonl"))?;
        let report_path = run_dir.join("report.json");
        let report_json = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        fs::write(&report_path, report_json).with_context(|| format!("Failed to write {}", report_path.display()))?;
    }

    info!("Total energy consumed in this run: {}", report.energy_consumed);
    Ok(())
}

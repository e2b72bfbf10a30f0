//! visicam: perspective-corrected camera stills on a fixed refresh cadence

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use visicam::cli::Args;
use visicam::pipeline::{CyclePaths, FrameCycleController, PipelineGraphBuilder, SystemClock};
use visicam::soft::SoftCore;
use visicam::Config;

fn main() -> Result<()> {
    // Arguments first: invalid ones exit before anything else is touched
    let args = Args::parse();

    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("visicam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("visicam launching...");

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    if let Some(core) = config.pipeline.control_core {
        let pinned = core_affinity::get_core_ids()
            .and_then(|ids| ids.into_iter().find(|id| id.id == core))
            .map(core_affinity::set_for_current)
            .unwrap_or(false);
        if pinned {
            info!("Control thread pinned to core {core}");
        } else {
            warn!("Could not pin control thread to core {core}");
        }
    }

    // Build the accelerator graph
    let geometry = args.geometry();
    info!("Capturing at {}x{}", geometry.width, geometry.height);
    let core = SoftCore::new();
    let (render_target, surfaces) = core.create_render_target(geometry);
    let mut session = PipelineGraphBuilder::new(&core, &config, geometry).build(render_target)?;

    // Run the frame cycle
    let paths = CyclePaths {
        homography: args.homography.clone(),
        processed: args.processed.clone(),
        captured: args.captured.clone(),
    };
    let mut controller =
        FrameCycleController::new(args.refresh_interval(), paths, SystemClock, surfaces)
            .with_cycle_rate(config.pipeline.cycle_rate);
    let cycles = controller.run(&mut session, config.pipeline.max_cycles)?;
    info!("visicam shutting down after {cycles} cycles");
    Ok(())
}

mod args;

pub use args::{parse_args, Args};

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::Story;
use crate::orchestrator::Orchestrator;

/// Loads the story, runs it until it finishes or a shutdown signal arrives,
/// and logs the firing counts.
pub async fn run(args: Args) -> Result<()> {
    if args.example {
        println!("{}", Story::example().to_json_pretty()?);
        return Ok(());
    }

    let story = Story::load(&args.config)
        .with_context(|| format!("Failed to read story {}", args.config.display()))?;

    let verbosity = if story.debug_logging {
        args.verbosity.max(3)
    } else {
        args.verbosity
    };
    let _guard = crate::logging::setup_logger(verbosity, args.log_file.as_deref())?;

    info!(story = %story.story_name, "Starting teller");
    let mut orchestrator = Orchestrator::new(story).with_seed(args.seed);
    if let Err(e) = orchestrator.start().await {
        error!("Failed to start the timelines: {}", e);
        return Err(e).context("Failed to start the timelines");
    }

    let report = orchestrator.run_until(shutdown_signal()).await;
    for timeline in &report.timelines {
        info!(timeline = %timeline.name, fired = timeline.fired, "Timeline report");
    }
    info!("Finished successfully");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

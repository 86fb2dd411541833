mod cli;
mod config;
mod error;
mod input;
mod output;

use std::process;

use clap::Parser;
use mimalloc::MiMalloc;
use streamcheck_engine::{Classifier, ProbeDispatcher, client};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::Result;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let app_config = AppConfig::load(args.config.as_deref())?;
    let probe_config = app_config.probe_config(&args)?;
    let classifier_config = app_config.classifier_config(&args)?;

    let http = client::create_client(&probe_config)?;
    let document = input::load_inputs(&args.inputs, &http).await?;
    let total = document.candidates.len();
    info!(candidates = total, inputs = args.inputs.len(), "Playlists loaded");

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing with the verdicts collected so far");
                token.cancel();
            }
        });
    }

    let show_progress = !args.no_progress && !args.quiet && total > 0;
    let (bar, callback) = output::progress_bar(total, show_progress);

    let mut dispatcher = ProbeDispatcher::http(probe_config)?.with_cancellation(token);
    if let Some(callback) = callback {
        dispatcher = dispatcher.with_progress(callback);
    }
    let results = dispatcher.run(document.candidates).await;
    bar.finish_and_clear();
    let summary = dispatcher.stats();

    let mut playlist = Classifier::new(classifier_config).classify(results.clone());
    playlist.header = document.header;

    output::write_playlist(&playlist, args.output.as_deref())?;
    if let Some(path) = &args.report {
        output::write_report(path, &results, &playlist, summary)?;
        info!(path = %path.display(), "Report written");
    }

    info!(
        kept = playlist.len(),
        groups = playlist.groups.len(),
        probed = total,
        "Verified playlist written"
    );
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // stdout may carry the playlist, so logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}

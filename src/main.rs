use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use booking_notifier::booking_api::BookingApiClient;
use booking_notifier::config;
use booking_notifier::logging;
use booking_notifier::cursor;
use booking_notifier::pushover::PushoverClient;
use booking_notifier::runner::{RunMode, Runner};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Notify about new bookings once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Fetch and report new bookings without sending or storing anything
    #[arg(long, conflicts_with = "baseline")]
    dry_run: bool,

    /// Mark all currently visible bookings as seen without sending
    #[arg(long)]
    baseline: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    cfg.apply_env();

    let mode = if args.dry_run {
        RunMode::DryRun
    } else if args.baseline {
        RunMode::Baseline
    } else {
        RunMode::Notify
    };

    let source = BookingApiClient::from_config(&cfg.booking_api)?;
    let notifier = PushoverClient::from_config(&cfg.pushover)?;
    let store = cursor::open(&cfg.state).await?;

    info!(org = %cfg.booking_api.org, ?mode, "starting booking run");
    let runner = Runner::new(&source, &notifier, store.as_ref(), cfg.run_settings()).with_mode(mode);
    match runner.run_once().await {
        Ok(report) => {
            info!(
                found = report.found,
                dispatched = report.dispatched,
                skipped = report.skipped,
                cursor = report.cursor,
                "run complete"
            );
            println!("{}", report);
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "run failed");
            Err(err.into())
        }
    }
}

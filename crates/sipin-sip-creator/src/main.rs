//! SIPin SIP creator - packages essence/sidecar pairs into bagged E-ARK SIPs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sipin_common::logging::{init_logging, LogConfig, LogLevel};
use sipin_sip_creator::bag::BagAssembler;
use sipin_sip_creator::config::AppConfig;
use sipin_sip_creator::events::JsonLinesPublisher;
use sipin_sip_creator::orchestrator::{Dispatcher, IngestionPipeline, RedeliveryPolicy};
use sipin_sip_creator::org_api::{LabelCache, OrgApiClient};
use sipin_sip_creator::transport::{ChannelTransport, Decision, Delivery, SettlementLog};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sipin-sip-creator")]
#[command(author, version, about = "Packages essence/sidecar pairs into bagged E-ARK SIPs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process JSON-lines notifications until end of input or Ctrl-C
    Run {
        /// Notification file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
    },

    /// Process a single notification
    Package {
        /// Notification JSON file
        notification: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sipin-sip-creator")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    let pipeline = Arc::new(build_pipeline(&config).await?);

    match cli.command {
        Command::Run { input } => {
            let reader: Box<dyn AsyncBufRead + Send + Unpin> = if input == "-" {
                Box::new(BufReader::new(tokio::io::stdin()))
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("Failed to open input {}", input))?;
                Box::new(BufReader::new(file))
            };
            run(pipeline, config.prefetch_count, config.redelivery, reader).await?;
        },
        Command::Package { notification } => {
            let body = tokio::fs::read(&notification)
                .await
                .with_context(|| format!("Failed to read {}", notification.display()))?;
            let handled = pipeline.handle(&Delivery { tag: 1, body }).await;
            info!(
                state = %handled.state,
                decision = ?handled.decision,
                outcome = ?handled.outcome,
                "Notification processed"
            );
            if handled.decision != Decision::Ack {
                anyhow::bail!(
                    "{} was not packaged ({})",
                    notification.display(),
                    handled.state
                );
            }
        },
    }

    Ok(())
}

async fn build_pipeline(config: &AppConfig) -> Result<IngestionPipeline> {
    let resolver = OrgApiClient::new(config.require_org_api()?.clone(), LabelCache::new())?;
    let publisher = JsonLinesPublisher::open(config.events_path.as_deref()).await?;

    Ok(IngestionPipeline::new(
        Arc::new(resolver),
        Arc::new(publisher),
        BagAssembler::new(config.bag.clone()),
        config.events.clone(),
        config.host.clone(),
    ))
}

async fn run(
    pipeline: Arc<IngestionPipeline>,
    prefetch: usize,
    redelivery: RedeliveryPolicy,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
) -> Result<()> {
    let (transport, receiver) = ChannelTransport::new(prefetch);
    let dispatcher = Dispatcher::new(pipeline, Arc::new(SettlementLog::new()), prefetch)
        .with_redelivery(redelivery);

    let feeder = tokio::spawn(transport.feed_lines(reader));
    let summary = dispatcher.run(receiver, shutdown_signal()).await;

    // After a shutdown the reader may still be waiting for input
    feeder.abort();
    match feeder.await {
        Ok(Ok(count)) => info!("Read {} notifications", count),
        Ok(Err(e)) => error!(error = %e, "Reading notifications failed"),
        Err(e) if e.is_cancelled() => info!("Stopped reading notifications"),
        Err(e) => error!(error = %e, "Input task failed"),
    }

    info!(
        acknowledged = summary.acknowledged,
        rejected = summary.rejected,
        requeued = summary.requeued,
        failed = summary.failed,
        redeliveries = summary.redeliveries,
        "Run complete"
    );

    if summary.unfinished() > 0 {
        anyhow::bail!(
            "{} notifications were not packaged ({} requeued, {} failed) and must be resubmitted",
            summary.unfinished(),
            summary.requeued,
            summary.failed
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        },
    }
}

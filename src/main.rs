use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vatsim_feed::log_format::FeedLogFormat;
use vatsim_feed::{
    HttpVatsimSource, NoReferenceData, ReferenceData, StandingData, VatsimPlugin, VatsimRemarks,
    VatsimSettings,
};

#[derive(Parser)]
#[command(name = "vatsim-feed")]
#[command(version, about = "Track VATSIM pilots as aircraft feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the network and log feed snapshots until interrupted
    Run {
        /// Settings file (TOML). Built-in defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Standing data file (JSON) with airports, airlines and aircraft types
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Seconds between feed snapshot reports
        #[arg(long, default_value = "30")]
        report_interval: u64,
    },

    /// Print the items found in a flight plan remarks string
    DecodeRemarks { text: String },

    /// Write the default settings to a file
    WriteDefaultConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            reference,
            metrics_port,
            report_interval,
        } => run(config, reference, metrics_port, report_interval).await,
        Commands::DecodeRemarks { text } => {
            decode_remarks(&text);
            Ok(())
        }
        Commands::WriteDefaultConfig { path } => {
            VatsimSettings::default().save(&path)?;
            info!(path = %path.display(), "Default settings written");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(FeedLogFormat::new(std::io::stdout().is_terminal()))
        .init();
}

async fn run(
    config: Option<PathBuf>,
    reference: Option<PathBuf>,
    metrics_port: Option<u16>,
    report_interval: u64,
) -> Result<()> {
    let settings = match &config {
        Some(path) => VatsimSettings::load(path)?,
        None => VatsimSettings::default(),
    };

    let reference: Arc<dyn ReferenceData> = match &reference {
        Some(path) => Arc::new(StandingData::load(path)?),
        None => Arc::new(NoReferenceData),
    };

    if let Some(port) = metrics_port {
        let address = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("Failed to start Prometheus exporter")?;
        info!(%address, "Serving metrics");
    }

    let source = Arc::new(HttpVatsimSource::new()?);
    let plugin = VatsimPlugin::new(settings, source, reference)?;
    plugin
        .poller()
        .on_started_changed(|started| info!(started, "VATSIM poller state changed"));
    plugin.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(Duration::from_secs(report_interval.max(1)));

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = interval.tick() => report(&plugin),
        }
    }

    info!("Shutting down");
    plugin.shutdown().await;
    Ok(())
}

fn report(plugin: &VatsimPlugin) {
    for feed in plugin.feeds() {
        let snapshot = feed.take_snapshot();
        info!(
            feed = %feed.name(),
            status = %feed.status(),
            visible = snapshot.aircraft.len(),
            tracked = feed.aircraft_count(),
            max_data_version = snapshot.max_data_version,
            "Feed snapshot"
        );
    }
}

fn decode_remarks(text: &str) {
    let remarks = VatsimRemarks::parse(text);
    for (key, value) in remarks.items() {
        println!("{key:>6}  {value}");
    }
    println!();
    println!("registration  {}", remarks.registration());
    println!("operator      {}", remarks.operator_icao());
    println!("mode-s code   {}", remarks.mode_s_code());
}

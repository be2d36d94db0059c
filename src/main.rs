use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use speedprobe::config::{LoggingConfig, ProbeConfig};
use speedprobe::throughput::report::format_summary;
use speedprobe::throughput::transport::HttpTransport;
use speedprobe::throughput::{sink, Direction, Orchestrator, RetryPolicy, TestRequest};

#[derive(Parser)]
#[command(
    name = "speedprobe",
    about = "Network throughput and latency measurement service",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (overrides SPEEDPROBE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the download and upload test endpoints
    Serve {
        /// Bind address (defaults to server.listen_address)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a measurement against a speedprobe server
    Run {
        /// Server base URL, e.g. http://10.0.0.2:8080
        #[arg(long, env = "SPEEDPROBE_SERVER")]
        server: String,

        /// Transfer direction
        #[arg(long, value_enum, default_value = "download")]
        direction: Direction,

        /// Payload size per round in bytes
        #[arg(long)]
        size: Option<u64>,

        /// Number of rounds
        #[arg(long)]
        rounds: Option<u32>,

        /// Per-round timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Measure latency with minimal payloads instead of throughput
        #[arg(long, conflicts_with = "size")]
        latency: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = ProbeConfig::resolve(cli.config.as_deref())?;
    init_tracing(&loaded.config.logging);
    loaded.log();
    let config = loaded.config;

    match cli.command {
        Commands::Serve { bind } => {
            let mut server = config.server.clone();
            if let Some(bind) = bind {
                server.listen_address = bind;
            }
            tracing::info!(bind = %server.listen_address, "Starting speedprobe server");
            speedprobe::serve(server).await?;
        }
        Commands::Run {
            server,
            direction,
            size,
            rounds,
            timeout_secs,
            latency,
            json,
        } => {
            let defaults = &config.orchestrator;
            let mut request = if latency {
                TestRequest::latency_probe(direction, defaults.round_count, defaults.timeout_per_round())
            } else {
                TestRequest::from_config(direction, defaults)
            };
            if let Some(size) = size {
                request.payload_size = size;
            }
            if let Some(rounds) = rounds {
                request.round_count = rounds;
            }
            if let Some(secs) = timeout_secs {
                request.timeout_per_round = Duration::from_secs(secs);
            }
            let token = CancellationToken::new();
            let request = request.with_cancellation(token.clone());

            // Ctrl-C stops after the round in flight; the partial result is still printed.
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing current round");
                    token.cancel();
                }
            });

            let transport = HttpTransport::new(server.as_str())?;
            let metric_sink = sink::from_config(&config.sink).context("failed to build metric sink")?;
            let orchestrator = Orchestrator::new(transport, metric_sink)
                .with_retry_policy(RetryPolicy::from(defaults));

            tracing::info!(%server, %direction, rounds = request.round_count, "Running network test");
            let result = orchestrator.run(&request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\n{}", format_summary(&result));
                println!("{:<6} | {:<9} | {:>12} | {:>10} | Attempts", "Round", "Status", "Bytes", "Elapsed");
                println!("{:-<6}-|-{:-<9}-|-{:->12}-|-{:->10}-|-{:-<8}", "", "", "", "", "");
                for s in &result.samples {
                    let status = match s.error_kind {
                        None => "OK".to_string(),
                        Some(kind) => format!("{:?}", kind).to_uppercase(),
                    };
                    println!(
                        "{:<6} | {:<9} | {:>12} | {:>8.1}ms | {}",
                        s.round,
                        status,
                        s.bytes_transferred,
                        s.elapsed.as_secs_f64() * 1000.0,
                        s.attempts
                    );
                }
                println!();
            }
        }
    }

    Ok(())
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_commands::{apply_batch, source::parse_commands, CommandSource, Router, SpoolSource, Watcher};
use warden_core::{CommandReport, IngressId};
use warden_kubehub::{KubeIngressStore, KubePolicyStore};

#[derive(Parser, Debug)]
#[command(name = "wardenctl", version, about = "Apply control-plane ACP commands to Ingresses")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Serve Prometheus metrics on this address (host:port)
    #[arg(long = "metrics-addr", env = "WARDEN_METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the command spool and apply batches until interrupted
    Watch {
        /// JSON array of pending commands, claimed on each poll
        #[arg(long = "commands", env = "WARDEN_COMMANDS_FILE")]
        commands: PathBuf,
        /// Reports are appended here as JSON lines
        #[arg(long = "reports", env = "WARDEN_REPORTS_FILE")]
        reports: PathBuf,
        /// Poll period in seconds
        #[arg(long = "interval-secs", env = "WARDEN_INTERVAL_SECS", default_value_t = 5)]
        interval_secs: u64,
    },
    /// Apply one batch of commands from a file and print the reports
    Apply {
        /// JSON array of commands (left in place)
        #[arg(long = "commands")]
        commands: PathBuf,
        /// Also append the reports here as JSON lines
        #[arg(long = "reports")]
        reports: Option<PathBuf>,
    },
    /// Show the name/namespace encoded in an ingress id
    ParseId {
        /// e.g. "whoami@default.ingress.networking.k8s.io"
        id: String,
    },
}

/// Log filter from `WARDEN_LOG`, falling back to `info` when unset or unparsable.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<SocketAddr>) {
    let Some(addr) = addr else { return };
    let installed = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install();
    if let Err(e) = installed {
        warn!(error = %e, %addr, "metrics exporter not installed");
    } else {
        info!(%addr, "serving metrics");
    }
}

async fn kube_router() -> Result<Router> {
    let client = warden_kubehub::get_kube_client().await?;
    Ok(Router::new(
        Arc::new(KubeIngressStore::new(client.clone())),
        Arc::new(KubePolicyStore::new(client)),
    ))
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM; Ctrl-C only"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

fn print_reports(output: Output, reports: &[CommandReport]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<24} {:<8} ERROR", "COMMAND", "STATUS");
            for r in reports {
                let status = if r.is_success() { "success" } else { "failure" };
                let err = match &r.error {
                    Some(e) => match &e.data {
                        Some(serde_json::Value::String(s)) => format!("{}: {}", e.kind, s),
                        Some(other) => format!("{}: {}", e.kind, other),
                        None => e.kind.to_string(),
                    },
                    None => "-".to_string(),
                };
                println!("{:<24} {:<8} {}", r.command_id, status, err);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(reports)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    init_metrics(cli.metrics_addr);

    match cli.command {
        Commands::Watch { commands, reports, interval_secs } => {
            info!(commands = %commands.display(), reports = %reports.display(), interval_secs, "watch invoked");
            let source = Arc::new(SpoolSource::new(commands, reports));
            let watcher = Watcher::new(source, kube_router().await?).with_interval(Duration::from_secs(interval_secs.max(1)));

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    shutdown_signal().await;
                    info!("shutdown signal received; finishing current cycle");
                    cancel.cancel();
                }
            });
            watcher.run(cancel).await;
        }
        Commands::Apply { commands, reports } => {
            info!(commands = %commands.display(), "apply invoked");
            let bytes = tokio::fs::read(&commands).await.with_context(|| format!("reading {}", commands.display()))?;
            let mut batch = parse_commands(&bytes)?;
            let router = kube_router().await?;
            let out = apply_batch(&router, &mut batch).await;
            if let Some(path) = reports {
                // Only the report side of the spool is used here.
                SpoolSource::new(&commands, path).send_command_reports(&out).await?;
            }
            print_reports(cli.output, &out)?;
        }
        Commands::ParseId { id } => match IngressId::parse(&id) {
            Ok(parsed) => match cli.output {
                Output::Human => println!("name: {}\nnamespace: {}", parsed.name, parsed.namespace),
                Output::Json => println!(
                    "{}",
                    serde_json::json!({"name": parsed.name, "namespace": parsed.namespace})
                ),
            },
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(2);
            }
        },
    }

    Ok(())
}

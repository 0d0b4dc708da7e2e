use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::CustomResourceExt;
use kuadra_controller::{AccountReconciler, ControllerConfig, Outcome};
use kuadra_core::{AwsAccount, ObjectKey, User};
use kuadra_iam::AwsIam;
use kuadra_kubehub::{KubeCluster, KubeRecords};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kuadractl", version, about = "Kuadra account operator")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all for `run`, current context for `reconcile`)
    #[arg(long = "ns", global = true, env = "KUADRA_NAMESPACE")]
    namespace: Option<String>,

    /// AWS region for IAM calls
    #[arg(long = "region", global = true, env = "KUADRA_AWS_REGION", default_value = kuadra_iam::DEFAULT_REGION)]
    region: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the AwsAccount and User controllers until interrupted
    Run {
        /// Seconds before a failed cycle is retried
        #[arg(long = "requeue-secs", env = "KUADRA_REQUEUE_SECS", default_value_t = 3)]
        requeue_secs: u64,
        /// Seconds between re-observations of converged accounts
        #[arg(long = "resync-secs", env = "KUADRA_RESYNC_SECS", default_value_t = 300)]
        resync_secs: u64,
        /// Prometheus listener, host:port
        #[arg(long = "metrics-addr", env = "KUADRA_METRICS_ADDR")]
        metrics_addr: Option<SocketAddr>,
    },
    /// Print the CustomResourceDefinitions as YAML
    Crds,
    /// Run one reconcile cycle for a single AwsAccount
    Reconcile {
        /// AwsAccount name
        name: String,
    },
}

fn init_tracing() {
    let env = std::env::var("KUADRA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// Serve Prometheus metrics on `addr`; no address means metrics stay in-process only.
fn init_metrics(addr: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = addr else { return Ok(()) };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("starting metrics exporter on {}", addr))?;
    info!(addr = %addr, "metrics exporter listening");
    Ok(())
}

fn crd_manifests() -> Result<String> {
    let accounts = serde_yaml::to_string(&AwsAccount::crd())?;
    let users = serde_yaml::to_string(&User::crd())?;
    Ok(format!("{}---\n{}", accounts, users))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => {
            print!("{}", crd_manifests()?);
        }
        Commands::Run { requeue_secs, resync_secs, metrics_addr } => {
            init_metrics(metrics_addr)?;
            let config = ControllerConfig {
                namespace: cli.namespace.clone(),
                requeue: Duration::from_secs(requeue_secs),
                resync: Duration::from_secs(resync_secs),
            };
            let client = kuadra_kubehub::kube_client().await.context("connecting to the cluster")?;
            let iam = Arc::new(AwsIam::from_env(&cli.region).await);
            let cancel = CancellationToken::new();
            let stop = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("interrupt received");
                }
                stop.cancel();
            });
            info!(region = %cli.region, "operator starting");
            if let Err(e) = kuadra_controller::run(client, iam, config, cancel).await {
                error!(error = ?e, "controller runtime failed");
                return Err(e);
            }
        }
        Commands::Reconcile { name } => {
            let client = kuadra_kubehub::kube_client().await.context("connecting to the cluster")?;
            let namespace = cli.namespace.clone().unwrap_or_else(|| client.default_namespace().to_string());
            let key = ObjectKey::namespaced(&namespace, &name);
            let reconciler = AccountReconciler::new(
                Arc::new(AwsIam::from_env(&cli.region).await),
                Arc::new(KubeCluster::new(client.clone())),
                Arc::new(KubeRecords::<AwsAccount>::new(client)),
            );
            info!(key = %key, "one-shot reconcile");
            let outcome = reconciler.reconcile(&key, &CancellationToken::new()).await?;
            match cli.output {
                Output::Human => match outcome {
                    Outcome::Gone => println!("{}: not found", key),
                    Outcome::Reconciled { status_written, converged } => {
                        println!("{}: converged={} status_written={}", key, converged, status_written)
                    }
                },
                Output::Json => {
                    let v = match outcome {
                        Outcome::Gone => serde_json::json!({ "key": key.to_string(), "found": false }),
                        Outcome::Reconciled { status_written, converged } => serde_json::json!({
                            "key": key.to_string(),
                            "found": true,
                            "converged": converged,
                            "statusWritten": status_written,
                        }),
                    };
                    println!("{}", serde_json::to_string_pretty(&v)?);
                }
            }
        }
    }
    Ok(())
}

//! taskweave — multi-agent task orchestrator gateway

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskweave_engine::{ArtifactStore, ExecutorConfig, FsRunStore, Orchestrator};
use taskweave_gateway::{start_gateway, BindMode, GatewayConfig};
use taskweave_tools::{CapabilityIndex, ToolClientConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskweave", about = "Taskweave — query-routed DAG orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        #[arg(short, long, default_value = "8180")]
        port: u16,
        #[arg(short, long, default_value = "loopback")]
        bind: String,
        /// Capability index JSON file
        #[arg(short = 'c', long)]
        capability_index: Option<PathBuf>,
        /// Run/node store root
        #[arg(long, default_value = "./taskweave-state")]
        state_dir: PathBuf,
        /// Artifact blob root
        #[arg(long, default_value = "./taskweave-artifacts")]
        artifacts_dir: PathBuf,
        /// Concurrent node dispatches per run
        #[arg(long, default_value = "4")]
        workers: usize,
        /// Cap on concurrently running tool processes
        #[arg(long, default_value = "16")]
        max_tool_processes: usize,
        /// Skip the --manifest handshake with declared tools
        #[arg(long)]
        skip_manifest_check: bool,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            capability_index,
            state_dir,
            artifacts_dir,
            workers,
            max_tool_processes,
            skip_manifest_check,
        } => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "taskweave=info,tower_http=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let index_path = capability_index
                .or_else(|| {
                    std::env::var("TASKWEAVE_CAPABILITY_INDEX")
                        .ok()
                        .map(PathBuf::from)
                })
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "no capability index: pass --capability-index or set TASKWEAVE_CAPABILITY_INDEX"
                    )
                })?;

            let mut index = CapabilityIndex::load(&index_path)?;
            info!(
                "loaded capability index from {} ({} tools)",
                index_path.display(),
                index.len()
            );

            if skip_manifest_check {
                warn!("manifest verification skipped; index trusted as-is");
            } else {
                let failures = taskweave_tools::verify_index(&mut index).await;
                for (tool, reason) in &failures {
                    warn!(tool, reason, "tool out of service");
                }
                info!(
                    "{}/{} tools available after manifest verification",
                    index.available_count(),
                    index.len()
                );
            }

            let store = Arc::new(FsRunStore::open(&state_dir).await?);
            let artifacts = Arc::new(ArtifactStore::new(&artifacts_dir));
            let orchestrator = Orchestrator::new(
                Arc::new(index),
                Arc::new(taskweave_agents::create_default_registry()),
                store,
                artifacts,
                ExecutorConfig {
                    workers,
                    ..Default::default()
                },
                ToolClientConfig {
                    max_inflight: max_tool_processes,
                    ..Default::default()
                },
            );

            let config = GatewayConfig {
                port,
                bind: BindMode::parse(&bind),
            };
            start_gateway(config, orchestrator).await?;
        }

        Commands::Version => {
            println!("taskweave v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

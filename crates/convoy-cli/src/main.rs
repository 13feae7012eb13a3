mod config;

use clap::{Parser, Subcommand};
use config::ConvoyConfig;
use convoy_gateway::GatewayServer;
use convoy_orchestrator::{PerformanceMonitor, WorkflowOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "convoy.toml";

#[derive(Parser)]
#[command(name = "convoy", about = "Convoy: agent message bus and workflow orchestrator")]
struct Cli {
    /// Path to config file (defaults to ./convoy.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one workflow with dry-run handlers and print the outcome
    Run {
        template: String,
        /// Run parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// List registered workflow templates
    Templates,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ConvoyConfig> {
    match path {
        Some(path) => Ok(ConvoyConfig::load(&path)?),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                Ok(ConvoyConfig::load(&default)?)
            } else {
                info!("No {DEFAULT_CONFIG} found, using built-in defaults");
                Ok(ConvoyConfig::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    let orchestrator = config.build_orchestrator()?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            orchestrator.bus().start();
            let monitor = Arc::new(PerformanceMonitor::new(
                config.monitor.clone(),
                orchestrator.clone(),
            ));
            monitor.start();

            let app = GatewayServer::build(orchestrator.clone(), Some(monitor.clone()));
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Convoy gateway listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_on_ctrl_c(orchestrator.clone()))
                .await?;
            monitor.stop().await;
            info!("Convoy gateway stopped");
        }
        Commands::Run { template, params } => {
            let parameters: serde_json::Value = serde_json::from_str(&params)
                .map_err(|e| anyhow::anyhow!("--params must be valid JSON: {e}"))?;
            let outcome = orchestrator.start_workflow(&template, parameters).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            orchestrator.shutdown().await;
            if !outcome.success {
                anyhow::bail!(
                    "workflow {template} failed: {}",
                    outcome.error.unwrap_or_default()
                );
            }
        }
        Commands::Templates => {
            let names = orchestrator.template_names();
            if names.is_empty() {
                println!("No templates registered.");
                println!("Configure templates in {DEFAULT_CONFIG} under [[templates]]");
            }
            for name in &names {
                let Some(template) = orchestrator.template(name) else {
                    continue;
                };
                if template.description.is_empty() {
                    println!("{name}");
                } else {
                    println!("{name}: {}", template.description);
                }
                for phase in &template.phases {
                    if phase.dependencies.is_empty() {
                        println!("  {} ({})", phase.name, phase.role);
                    } else {
                        println!(
                            "  {} ({}) after {}",
                            phase.name,
                            phase.role,
                            phase.dependencies.join(", ")
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

/// Resolve on Ctrl-C after interrupting active runs and closing every agent
/// connection, so open sockets do not hold the server up.
async fn shutdown_on_ctrl_c(orchestrator: Arc<WorkflowOrchestrator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown requested");
    orchestrator.shutdown().await;
}

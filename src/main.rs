use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tidewave_runtime::api::{Orchestrator, OrchestratorConfig, OrchestratorServer};
use tidewave_runtime::config::Settings;
use tidewave_runtime::engine::{init_engine_logging, EngineWorker};
use tidewave_runtime::llm::LlmGateway;
use tidewave_runtime::research::{ResearchAgent, ResearchAgentConfig};
use tidewave_runtime::search::HttpSearchClient;
use tidewave_runtime::types::EngineKind;

#[derive(Parser)]
#[command(
    name = "tidewave",
    version,
    about = "Multi-engine public opinion analysis platform"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator API server
    Serve {
        /// Bind address override (defaults to HOST from configuration)
        #[arg(long)]
        host: Option<String>,
        /// Port override (defaults to PORT from configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one engine worker (spawned by the supervisor)
    Engine {
        /// Engine name: query, media, or insight
        #[arg(long)]
        engine: String,
        /// Loopback port for the worker's HTTP surface
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => serve(host, port).await,
        Commands::Engine { engine, port } => run_engine(&engine, port).await,
    }
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load();
    let host = host.unwrap_or_else(|| settings.host());
    let port = port.unwrap_or_else(|| settings.port());

    let config = OrchestratorConfig::from_settings(&settings);
    let orchestrator = Arc::new(Orchestrator::new(settings, config));

    tracing::info!("Waiting for configuration confirmation; components start on request");
    OrchestratorServer::new(orchestrator)
        .start(&host, port)
        .await
        .context("orchestrator server failed")
}

async fn run_engine(name: &str, port: Option<u16>) -> anyhow::Result<()> {
    let engine =
        EngineKind::parse(name).with_context(|| format!("unknown engine: {name}"))?;

    // Wire-format lines on stdout: the supervisor pumps them into the
    // per-engine log the forum tailer reads.
    init_engine_logging();

    let settings = Settings::load();
    let port = port.unwrap_or_else(|| engine.api_port());

    let llm = Arc::new(LlmGateway::new(settings.clone()));
    let search = Arc::new(HttpSearchClient::new(
        settings.tavily_api_key().unwrap_or_default(),
        std::time::Duration::from_secs(settings.search_timeout()),
    ));
    let agent = Arc::new(ResearchAgent::new(
        ResearchAgentConfig::for_engine(engine, &settings),
        llm,
        search,
    ));

    EngineWorker::new(agent)
        .serve(port)
        .await
        .context("engine worker failed")?;
    Ok(())
}

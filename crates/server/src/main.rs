use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod api;
mod config;
mod store;
mod websocket;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "toolgraph")]
#[command(about = "Compile and run tool workflow graphs", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TOOLGRAPH_CONFIG", default_value = "toolgraph.toml")]
    config: PathBuf,

    /// Data directory for saved workflows
    #[arg(short, long, env = "TOOLGRAPH_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Load and validate the configuration, then exit without serving
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolgraph=info,toolgraph_core=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting Toolgraph");
    tracing::info!("Data directory: {}", args.data_dir.display());

    // Load configuration
    let config = ServerConfig::load(&args.config, args.data_dir)?;
    log_settings(&config);

    if args.check {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Start API server
    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Starting API server on {}", addr);

    api::serve(&addr, config).await?;

    Ok(())
}

fn log_settings(config: &ServerConfig) {
    let engine = config.engine_config();
    tracing::info!(
        "Engine: tool timeout {:?}, unknown tools {:?}, event buffer {}",
        engine.tool_timeout,
        engine.unknown_tools,
        config.engine.event_buffer
    );
    tracing::info!("Workflow file: {}", config.workflow_path().display());
    tracing::info!("LLM endpoint: {} (model {})", config.llm.base_url, config.llm.model);
}

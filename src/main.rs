//! Graph-RAG server entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use graphrag::pipeline::models::ResponseFormat;
use graphrag::schema::refresh_schema;
use graphrag::{start_server, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "graphrag")]
#[command(about = "Graph-RAG question answering over a Neo4j knowledge graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Rebuild the schema allow-list and term index (admin mode only)
    RefreshSchema,

    /// Answer a single question from the command line
    Ask {
        /// The question to answer
        question: String,

        /// Output format: text, table or graph
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graphrag=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            start_server(config).await
        }
        Commands::RefreshSchema => run_refresh(config).await,
        Commands::Ask { question, format } => run_ask(config, &question, &format).await,
    }
}

async fn run_refresh(config: Config) -> Result<()> {
    use graphrag::AppMode;

    if config.mode != AppMode::Admin || !config.allow_writes {
        anyhow::bail!(
            "schema refresh needs APP_MODE=admin and ALLOW_WRITES=true (current mode: {:?})",
            config.mode
        );
    }

    let state = AppState::new(config).await?;
    let report = refresh_schema(&state.catalog, &state.embedder)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    println!("Schema refresh complete.");
    println!("  fingerprint:     {}", report.fingerprint);
    println!("  schema changed:  {}", report.schema_changed);
    println!("  terms indexed:   {}", report.terms_indexed);
    println!(
        "  index dimension: {}",
        report
            .index_dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  index rebuilt:   {}", report.index_rebuilt);
    Ok(())
}

async fn run_ask(config: Config, question: &str, format: &str) -> Result<()> {
    let format = match format {
        "table" => ResponseFormat::Table,
        "graph" => ResponseFormat::Graph,
        _ => ResponseFormat::Text,
    };

    let state = AppState::new(config).await?;
    match state.pipeline.ask(question, format).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("request failed: {}", e);
            std::process::exit(1);
        }
    }
}

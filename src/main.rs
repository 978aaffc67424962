use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use askdoc::chunk::chunk_units;
use askdoc::config;
use askdoc::extract::extract_units;
use askdoc::gateway::{ModelGateway, OllamaGateway};
use askdoc::models::FileType;
use askdoc::server::run_server;

#[derive(Parser)]
#[command(name = "askdoc", version, about = "Local document question answering over Ollama")]
struct Cli {
    /// Path to the TOML config file. Built-in defaults apply when absent.
    #[arg(long, global = true, default_value = "./config/askdoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,
    /// Extract text units from a local file and print them.
    Extract {
        /// Path to a .pdf, .docx, or .txt file.
        file: PathBuf,
        /// Also print the derived chunks with their source locators.
        #[arg(long)]
        chunks: bool,
    },
    /// List the models available on the Ollama runtime.
    Models,
    /// Probe the Ollama runtime and report reachability.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => run_server(&config).await,
        Commands::Extract { file, chunks } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("invalid file path: {}", file.display()))?;
            let file_type = FileType::from_filename(name)
                .with_context(|| format!("unsupported file type: {}", name))?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let units = extract_units(&bytes, file_type)?;

            println!("{} ({}): {} units", name, file_type.as_str(), units.len());
            for unit in &units {
                println!("--- {} ---", unit.locator);
                println!("{}", unit.text);
            }

            if chunks {
                let derived =
                    chunk_units(&units, config.chunking.chunk_size, config.chunking.overlap);
                println!("\n{} chunks:", derived.len());
                for (i, chunk) in derived.iter().enumerate() {
                    let labels = chunk
                        .source_locators
                        .iter()
                        .map(|l| l.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!("[{}] {} chars from {}", i, chunk.text.chars().count(), labels);
                }
            }
            Ok(())
        }
        Commands::Models => {
            let gateway = OllamaGateway::new(&config.ollama)?;
            let models = gateway.list_models().await?;
            if models.is_empty() {
                println!("No models available (try `ollama pull llama2`).");
            } else {
                for model in models {
                    println!("{}", model);
                }
            }
            Ok(())
        }
        Commands::Health => {
            let gateway = OllamaGateway::new(&config.ollama)?;
            if gateway.health().await {
                println!("Ollama reachable at {}", config.ollama.url);
            } else {
                println!("Ollama NOT reachable at {}", config.ollama.url);
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

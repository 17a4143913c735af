//! paperflow CLI - resumable research-paper pipelines

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use paperflow::workflow::{self, RunSummary};
use paperflow::{AppConfig, LlmClient};

#[derive(Parser)]
#[command(name = "paperflow")]
#[command(about = "paperflow - resumable DAG pipelines for research-paper digests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge new papers against the target topic with the LLM filter
    Filter {
        /// Path to the YAML config file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    /// Download, read and summarize pending papers in batches
    Summarize {
        /// Path to the YAML config file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    /// Push unpushed summaries to the Feishu webhook
    Push {
        /// Path to the YAML config file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Filter { config } => run_filter(&config).await,
        Commands::Summarize { config } => run_summarize(&config).await,
        Commands::Push { config } => run_push(&config).await,
    };

    match result {
        Ok(summary) => {
            println!(
                "{} processed {} items in {} round{}",
                "✓".green(),
                summary.processed,
                summary.rounds,
                if summary.rounds == 1 { "" } else { "s" }
            );
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run_filter(config_path: &str) -> anyhow::Result<RunSummary> {
    let config = AppConfig::from_yaml_file(config_path)?;
    let chat = Arc::new(LlmClient::new(&config.llm)?);
    workflow::run_filter(&config, chat)
        .await
        .context("filter pipeline failed")
}

async fn run_summarize(config_path: &str) -> anyhow::Result<RunSummary> {
    let config = AppConfig::from_yaml_file(config_path)?;
    let chat = Arc::new(LlmClient::new(&config.llm)?);
    workflow::run_summarize(&config, chat)
        .await
        .context("summarize pipeline failed")
}

async fn run_push(config_path: &str) -> anyhow::Result<RunSummary> {
    let config = AppConfig::from_yaml_file(config_path)?;
    workflow::run_push(&config).await.context("push pipeline failed")
}

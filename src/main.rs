use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use syllabus_rag::config::AppConfig;
use syllabus_rag::rag::{info_lines, print_answer, SyllabusEngine};
use syllabus_rag::server::{self, AppState};

/// Ask questions about university syllabus PDFs using local embeddings, Qdrant and OpenRouter
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, chunk and index one or more syllabus files
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a single question from the indexed syllabi
    Ask { question: String },
    /// Interactive question loop
    Chat,
    /// Show the active settings and how many chunks are stored
    Info,
    /// Delete every indexed document
    Clear,
    /// Start the web interface
    Serve {
        /// Address to listen on, overrides BIND_ADDRESS
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let config = match AppConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    for line in config.describe() {
        info!("{}", line);
    }

    let engine = SyllabusEngine::from_config(&config).context("Failed to initialize RAG engine")?;

    match command {
        Command::Ingest { files } => {
            let report = engine.ingest_files(&files).await;
            for file in &report.files {
                match &file.outcome {
                    Ok(outcome) => println!("{}: {:?}", file.file_name, outcome),
                    Err(e) => println!("{}: error: {:#}", file.file_name, e),
                }
            }
            println!(
                "\n{} indexed, {} skipped, {} failed",
                report.indexed(),
                report.skipped(),
                report.failed()
            );
        }
        Command::Ask { question } => {
            let answer = engine
                .answer_question(&question)
                .await
                .context("Error processing question")?;
            print_answer(&answer);
        }
        Command::Chat => {
            engine
                .run_query_loop()
                .await
                .context("Error in query loop")?;
        }
        Command::Info => {
            let info = engine.collection_info().await?;
            for line in info_lines(&config, &info) {
                println!("{}", line);
            }
        }
        Command::Clear => {
            engine.clear().await?;
            println!("Database cleared!");
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind_address.clone());
            let state = Arc::new(AppState { engine, config });
            server::serve(state, &bind).await?;
        }
    }

    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clinical_dialogue::batch::{BatchRunner, BatchSummary};
use clinical_dialogue::config::{load_api_key, Config, ConfigOverrides};
use clinical_dialogue::error::DialogueError;
use clinical_dialogue::generator::GeminiGenerator;
use clinical_dialogue::loop_controller::LoopController;
use clinical_dialogue::transcript::TranscriptWriter;

/// Clinical Dialogue: generate synthetic doctor-patient conversations with Gemini
#[derive(Parser, Debug)]
#[command(name = "clinical-dialogue")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of conversations to generate (default: 1)
    #[arg(short = 'n', long = "num-conversations")]
    num_conversations: Option<u32>,

    /// Directory to save the generated conversation files (default: generated_conversations)
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Language for the generation prompts: en or it (default: en)
    #[arg(short = 'l', long = "language")]
    language: Option<String>,

    /// Name of the Gemini model to use (default: gemini-2.5-flash)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Maximum number of tokens to generate per API request (default: 10000)
    #[arg(long = "max-tokens")]
    max_tokens: Option<u32>,

    /// Total number of exchanges (doctor-patient pairs) per conversation (default: 5)
    #[arg(long = "max-exchanges")]
    max_exchanges: Option<u32>,

    /// Number of exchanges to request in a single API call (default: 5)
    #[arg(long = "exchanges-per-call")]
    exchanges_per_call: Option<u32>,

    /// Maximum API requests per minute (default: 9)
    #[arg(long = "rpm")]
    rpm: Option<u32>,

    /// Config file (TOML format)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("clinical_dialogue=debug,info")
    } else {
        EnvFilter::new("clinical_dialogue=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, DialogueError> {
    // explicit --config, then the per-user file, then defaults
    let mut config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => match Config::user_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                info!("Using config file {}", path.display());
                Config::from_file(&path)?
            }
            None => Config::default(),
        },
    };

    config.merge_cli_args(ConfigOverrides {
        num_conversations: cli.num_conversations,
        output_dir: cli.output_dir.clone(),
        language: cli.language.clone(),
        model: cli.model.clone(),
        max_tokens: cli.max_tokens,
        max_exchanges: cli.max_exchanges,
        exchanges_per_call: cli.exchanges_per_call,
        requests_per_minute: cli.rpm,
    })?;
    config.validate()?;

    Ok(config)
}

async fn run(
    config: Config,
    api_key: String,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<BatchSummary, DialogueError> {
    let writer = TranscriptWriter::new(&config, None)?;
    if writer.created_output_dir() {
        info!("Directory '{}' created.", config.output_dir.display());
    }
    info!(
        "Run {} writing to {}",
        writer.run_id().cyan(),
        config.output_dir.display()
    );
    info!(
        "Model: {}, {} exchanges per conversation, {} per call, {} requests/minute",
        config.model, config.max_exchanges, config.exchanges_per_call, config.requests_per_minute
    );

    let config = Arc::new(config);
    let generator = GeminiGenerator::new(api_key, &config)?;
    let controller = LoopController::with_config(config, generator)?;

    BatchRunner::new(controller, writer).run(shutdown_rx).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    // Setup shutdown signal handling
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = shutdown_tx_clone.send(());
        }
    });

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let api_key = match load_api_key() {
        Ok(key) => key,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    match run(config, api_key, shutdown_rx).await {
        Ok(summary) if summary.is_success() => {
            println!(
                "\n{} {} conversation(s) generated ({} without closing), {} tokens in total",
                "SUCCESS:".green().bold(),
                summary.completed + summary.unclosed,
                summary.unclosed,
                summary.total_tokens
            );
            std::process::exit(0);
        }
        Ok(summary) => {
            println!(
                "\n{} {} completed, {} aborted, {} not saved, {} tokens in total",
                "FAILED:".red().bold(),
                summary.completed + summary.unclosed,
                summary.aborted,
                summary.write_failures,
                summary.total_tokens
            );
            std::process::exit(1);
        }
        Err(DialogueError::ShutdownRequested) => {
            println!("\n{} Shutdown requested", "INTERRUPTED:".yellow().bold());
            std::process::exit(130);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

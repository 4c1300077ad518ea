mod archive;
mod checkpoint;
mod config;
mod error;
mod fetch;
mod heuristics;
mod helper;
mod normalize;
mod notify;
mod pdf_text;
mod run_loop;
mod sheet;
mod ui;

use clap::{Parser, Subcommand};
use config::Settings;
use error::BotError;
use fetch::{CommandRetrievalClient, FetchStage};
use helper::{InProcess, ProcessHelper};
use run_loop::RunLoop;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};
use ui::WebDriverClient;

const LOG_FILE: &str = "logs/script.log";

#[derive(Parser)]
#[command(name = "invoice_posting", version, about = "Posts purchase invoices and debit notes from tax-authority exports")]
struct Cli {
    /// Folder holding config/, inputs/, pdf/ and the rest of the working tree
    #[arg(long, global = true, env = "BOT_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Post every pending row of the input spreadsheets
    Run,
    /// Download the PDFs referenced by the input spreadsheets
    Fetch,
    /// Extract fields from the PDFs listed in pdf_routes.json
    ExtractPdf,
}

fn init_tracing(base_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = base_dir.join(LOG_FILE);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(true).with_level(true))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.base_dir)?;

    let settings = Settings::load(&cli.base_dir)?;
    let paths = &settings.config.paths;
    let run = &settings.config.run;

    match cli.command {
        Command::Run => {
            let helper = ProcessHelper::current_exe(&settings.base_dir, &paths.config)?;
            let mut run_loop = RunLoop::new(&settings, &helper);
            let summary = run_loop.run(|| {
                Ok(WebDriverClient::launch(
                    &paths.web_driver,
                    run.webdriver_port,
                    &paths.downloads,
                    run.element_timeout(),
                )?)
            })?;
            info!(
                files = summary.files,
                posted = summary.posted,
                failed = summary.failed,
                pending = summary.pending,
                "DONE"
            );
        }
        Command::Fetch => {
            let argv = settings
                .config
                .retrieval_command
                .clone()
                .ok_or_else(|| BotError::Config("comando_descarga is not configured".into()))?;
            let mut stage = FetchStage::new(&settings, CommandRetrievalClient::new(argv)?, &InProcess);
            let summary = stage.run()?;
            info!(
                files = summary.files,
                stored = summary.stored,
                pending = summary.pending,
                "DONE"
            );
        }
        Command::ExtractPdf => {
            let count = helper::run_extract_command(&paths.config)?;
            info!(count, "DONE");
        }
    }
    Ok(())
}

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};

use strava_uploader::config::ProgressFile;
use strava_uploader::logging;
use strava_uploader::retry::RateLimitPolicy;
use strava_uploader::session::Session;
use strava_uploader::sync::SyncJob;
use strava_uploader::uploader::{Dispatcher, DispatcherConfig};

#[derive(Parser)]
#[command(name = "strava-uploader", about = "Upload GPX files to Strava.")]
struct Cli {
    /// Only show errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose logging, repeat (-vv) for debug output
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration and progress file
    #[arg(long, global = true, default_value = "config.ini")]
    config: PathBuf,

    /// File containing `<client id>,<client secret>`
    #[arg(long, global = true, default_value = "client_secrets.txt")]
    secrets: PathBuf,

    /// JSON file with the stored access and refresh tokens
    #[arg(long, global = true, default_value = "tokens.json")]
    tokens: PathBuf,

    /// Debug log file
    #[arg(long, global = true, default_value = "/tmp/strava-uploader.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload new GPX files from the sync directory (default)
    Upload {
        /// Classify and name files without uploading anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Check the stored credentials by greeting the authenticated athlete
    Whoami,
}

impl Cli {
    fn console_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    }
}

async fn upload(cli: &Cli, dry_run: bool) -> anyhow::Result<()> {
    let progress = ProgressFile::load(&cli.config)?;
    let config = progress.config()?;

    let dispatcher_config = DispatcherConfig {
        dry_run: dry_run || config.dry_run,
        rate_limit: RateLimitPolicy::with_delay(config.rate_limit_sleep),
        ..DispatcherConfig::default()
    };

    let client = Session::establish(&cli.secrets, &cli.tokens)
        .await?
        .into_client();

    let mut job = SyncJob::new(
        progress,
        config.activity_dir(),
        Dispatcher::new(client, dispatcher_config),
        Local,
    );
    let summary = job.run().await?;

    info!(
        "Run complete: {} uploaded, {} duplicate(s) skipped",
        summary.uploaded, summary.duplicates
    );
    Ok(())
}

async fn whoami(cli: &Cli) -> anyhow::Result<()> {
    let session = Session::establish(&cli.secrets, &cli.tokens).await?;
    let athlete = session.athlete().await?;
    println!("Hi, {}!", athlete.firstname.as_deref().unwrap_or("athlete"));
    Ok(())
}

pub async fn cli_main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.console_level(), &cli.log_file) {
        eprintln!("Error: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Some(Commands::Whoami) => whoami(&cli).await,
        Some(Commands::Upload { dry_run }) => run_upload(&cli, *dry_run).await,
        None => run_upload(&cli, false).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_upload(cli: &Cli, dry_run: bool) -> anyhow::Result<()> {
    info!("--------------------------------------------------------");
    println!("Starting Strava Uploader...");
    upload(cli, dry_run).await?;
    println!("Finished Strava Uploader");
    Ok(())
}

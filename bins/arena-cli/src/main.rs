mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::ApiClient;
use commands::PayloadSource;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "arena-cli")]
#[command(about = "Arena CLI - Submit code, poll jobs, inspect languages", long_about = None)]
struct Cli {
    /// Base URL of the Arena API
    #[arg(long, env = "ARENA_API_URL", default_value = "http://127.0.0.1:3000", global = true)]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source file for execution
    Submit {
        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Language id or name (e.g., 71, python)
        #[arg(short, long)]
        language: String,

        /// stdin text for a single run
        #[arg(short, long, conflicts_with_all = ["stdin_file", "cases"])]
        input: Option<String>,

        /// File whose contents are the stdin of a single run
        #[arg(long, conflicts_with = "cases")]
        stdin_file: Option<PathBuf>,

        /// JSON file with a test case array; submits a batch job
        #[arg(short, long)]
        cases: Option<PathBuf>,

        /// Wait for the result after submitting
        #[arg(short, long, default_value = "false")]
        wait: bool,

        /// Seconds to wait before giving up
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Show the current status of a job
    Poll {
        job_id: Uuid,
    },

    /// Poll a job until it finishes
    Wait {
        job_id: Uuid,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval: u64,

        /// Seconds to wait before giving up
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// List languages configured on the API
    Languages {
        /// Validate a local languages.json instead of querying the API
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

const SUBMIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Submit {
            file,
            language,
            input,
            stdin_file,
            cases,
            wait,
            timeout,
        } => {
            let language_id = commands::resolve_language(&client, &language).await?;
            let payload = match (&cases, &stdin_file) {
                (Some(path), _) => PayloadSource::CasesFile(path),
                (None, Some(path)) => PayloadSource::StdinFile(path),
                (None, None) => PayloadSource::Stdin(input.as_deref()),
            };
            let request = commands::build_request(&file, language_id, payload)?;
            let job_id = commands::submit(&client, request).await?;
            if wait {
                commands::wait(&client, job_id, SUBMIT_POLL_INTERVAL, Duration::from_secs(timeout)).await?;
            }
        }
        Commands::Poll { job_id } => {
            commands::poll(&client, job_id).await?;
        }
        Commands::Wait {
            job_id,
            interval,
            timeout,
        } => {
            commands::wait(
                &client,
                job_id,
                Duration::from_millis(interval),
                Duration::from_secs(timeout),
            )
            .await?;
        }
        Commands::Languages { check } => match check {
            Some(path) => commands::check_languages_file(&path)?,
            None => commands::list_languages(&client).await?,
        },
    }

    Ok(())
}

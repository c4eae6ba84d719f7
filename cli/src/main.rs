mod commands;
mod config;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    LogArgs, Service, cmd_log, cmd_month, cmd_queue_clear, cmd_queue_list, cmd_remove, cmd_show,
    cmd_status, cmd_sync, cmd_watch,
};
use crate::config::Config;
use crate::remote::HttpRecordClient;
use reps_core::queue::PendingQueue;
use reps_core::store::RecordStore;

#[derive(Parser)]
#[command(
    name = "reps",
    version,
    about = "A workout log that keeps working offline",
    long_about = "A workout log that keeps working offline.\n\n\
        Exercises are saved to a remote record store. When the remote cannot be\n\
        reached, writes are queued on this device and sent once it is back."
)]
struct Cli {
    /// Base URL of the record store
    #[arg(
        long,
        global = true,
        env = "REPS_REMOTE_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    remote: String,
    /// API key for the record store
    #[arg(long, global = true, env = "REPS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log an exercise
    Log {
        /// Exercise name
        name: String,
        /// Sets as WEIGHTxREPS (e.g. "60x10") or just REPS for bodyweight
        sets: Vec<String>,
        /// Date to log for (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Duration in minutes
        #[arg(long)]
        duration: Option<u32>,
        /// Free-text note
        #[arg(long)]
        memo: Option<String>,
        /// Reference to an uploaded image (repeatable)
        #[arg(long = "image", value_name = "REF")]
        images: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the exercises for a day (defaults to today)
    Show {
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an exercise from a day by ID (or ID prefix)
    Remove {
        /// Exercise ID or a unique prefix of it
        exercise_id: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which days of a month have records
    Month {
        /// Month to show (YYYY-MM, default: this month)
        month: Option<String>,
        /// Ignore the cached listing
        #[arg(long)]
        refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show connectivity and queued writes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send queued writes to the remote now
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or discard queued writes
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Keep running and sync queued writes whenever the remote is reachable
    Watch {
        /// Seconds between connectivity checks
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },
    /// Start the record store server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List queued writes in the order they will be sent
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard every queued write
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Open the local queue and check once whether the remote answers.
async fn open_service(config: &Config, remote: &str, api_key: Option<String>) -> Result<Service> {
    let client = HttpRecordClient::new(remote, api_key)?;
    let reachable = client.probe().await;
    let queue = PendingQueue::open(&config.db_path)?;
    Service::new(queue, client, reachable)
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    if let Commands::Serve {
        port,
        bind,
        no_auth,
    } = cli.command
    {
        let (api_key, new_api_key) = if no_auth {
            (None, false)
        } else {
            let (key, new) = config.load_or_create_api_key()?;
            (Some(key), new)
        };
        let store = RecordStore::open(&config.remote_db_path)?;
        return server::start_server(store, port, &bind, api_key, new_api_key).await;
    }

    let service = open_service(&config, &cli.remote, cli.api_key).await?;

    match cli.command {
        Commands::Log {
            name,
            sets,
            date,
            duration,
            memo,
            images,
            json,
        } => {
            let args = LogArgs {
                name,
                sets,
                date,
                duration,
                memo,
                images,
            };
            cmd_log(&service, args, json).await
        }
        Commands::Show { date, json } => cmd_show(&service, date, json).await,
        Commands::Remove {
            exercise_id,
            date,
            json,
        } => cmd_remove(&service, &exercise_id, date, json).await,
        Commands::Month {
            month,
            refresh,
            json,
        } => cmd_month(&service, month, refresh, json).await,
        Commands::Status { json } => cmd_status(&service, json),
        Commands::Sync { json } => cmd_sync(&service, json).await,
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => cmd_queue_list(&service, json),
            QueueCommands::Clear { json } => cmd_queue_clear(&service, json).await,
        },
        Commands::Watch { interval } => cmd_watch(Arc::new(service), interval).await,
        Commands::Serve { .. } => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn log_accepts_sets_and_options() {
        let cli = Cli::try_parse_from([
            "reps", "log", "squat", "60x10", "60x8", "--date", "2024-05-01", "--memo", "felt heavy",
        ])
        .unwrap();
        match cli.command {
            Commands::Log {
                name, sets, date, memo, ..
            } => {
                assert_eq!(name, "squat");
                assert_eq!(sets, vec!["60x10", "60x8"]);
                assert_eq!(date.as_deref(), Some("2024-05-01"));
                assert_eq!(memo.as_deref(), Some("felt heavy"));
            }
            _ => panic!("expected log"),
        }
    }

    #[test]
    fn remote_flag_is_global() {
        let cli =
            Cli::try_parse_from(["reps", "status", "--remote", "http://example.test:9000"]).unwrap();
        assert_eq!(cli.remote, "http://example.test:9000");
    }
}

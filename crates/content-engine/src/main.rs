//! Content Engine: publish queue worker and control CLI.
//!
//! Main binary with subcommands:
//! - `worker`: Process due publish jobs, once or continuously
//! - `queue`: Inspect and manage the job queue
//! - `ingest` / `sync`: Bring content into the queue from files
//! - `auth import`: Store platform credentials obtained elsewhere
//! - `mcp-server`: MCP server mode over stdio

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use content_engine_publish::DEFAULT_API_BASE;
use content_engine_queue::{
    Credentials, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS, Enqueuer, JobId, Platform, PostId,
};

mod commands;
mod worker;

const DEFAULT_LOG_FILTER: &str = "content_engine=info,content_engine_queue=info,content_engine_publish=info,content_engine_mcp=info";

#[derive(Parser)]
#[command(name = "content-engine")]
#[command(about = "Scheduled publishing queue for Content Engine", long_about = None)]
struct Cli {
    /// SQLite database path (default: <data dir>/content-engine/content.db)
    #[arg(long, global = true, env = "CONTENT_ENGINE_DB")]
    db: Option<PathBuf>,

    /// Publish attempts given to newly created jobs
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_ATTEMPTS,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process due publish jobs
    Worker {
        /// Keep polling until interrupted
        #[arg(long)]
        continuous: bool,

        /// Mark jobs published without contacting any platform
        #[arg(long)]
        dry_run: bool,

        /// Seconds between polls in continuous mode
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        poll_interval: u64,

        /// LinkedIn API base URL
        #[arg(long, env = "CONTENT_ENGINE_LINKEDIN_API", default_value = DEFAULT_API_BASE)]
        linkedin_api: String,
    },

    /// Inspect and manage the job queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Ingest content as an approved post
    Ingest {
        /// File to read the content from (also recorded as the source file)
        #[arg(value_name = "FILE", required_unless_present = "content")]
        file: Option<PathBuf>,

        /// Inline content instead of a file
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,

        /// Target platform
        #[arg(long, default_value = "linkedin")]
        platform: Platform,
    },

    /// Re-sync a queued post from its source file
    Sync {
        /// Source file the post was ingested from
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Manage platform credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Run the MCP server using stdio transport
    McpServer,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// List pending jobs in processing order
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List jobs scheduled within the next N days
    Scheduled {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Show a job, or a post with all of its jobs
    Status {
        #[arg(long, required_unless_present = "post_id")]
        job_id: Option<i64>,

        #[arg(long)]
        post_id: Option<i64>,
    },

    /// Cancel a pending job, or every pending job of a post
    Cancel {
        #[arg(long, required_unless_present = "post_id", conflicts_with = "post_id")]
        job_id: Option<i64>,

        #[arg(long)]
        post_id: Option<i64>,
    },

    /// Queue a post for immediate publishing
    Fire {
        post_id: i64,
    },

    /// Schedule a post for a future time
    Schedule {
        post_id: i64,

        /// ISO 8601 time; naive times are UTC
        when: String,

        #[arg(long, default_value_t = 0)]
        priority: i64,

        #[arg(long)]
        source_file: Option<String>,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Store an access token for a platform
    Import {
        /// Platform the token belongs to
        #[arg(long, default_value = "linkedin")]
        platform: Platform,

        #[arg(long, env = "CONTENT_ENGINE_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Token expiry (ISO 8601)
        #[arg(long)]
        expires_at: Option<String>,

        /// Platform user id (LinkedIn member `sub`)
        #[arg(long)]
        user_sub: Option<String>,

        #[arg(long)]
        user_email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output and the MCP transport
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let store = commands::open_store(cli.db)?;
    let enqueuer = Enqueuer::new(store.clone()).with_max_attempts(cli.max_attempts);

    match cli.command {
        Commands::Worker {
            continuous,
            dry_run,
            poll_interval,
            linkedin_api,
        } => {
            worker::run(
                store,
                worker::Options {
                    continuous,
                    dry_run,
                    poll_interval,
                    linkedin_api,
                },
            )
            .await
        }
        Commands::Queue { command } => match command {
            QueueCommand::List { limit } => commands::print_json(enqueuer.list_pending(limit)),
            QueueCommand::Scheduled { days } => {
                commands::print_json(enqueuer.list_scheduled(days))
            }
            QueueCommand::Status { job_id, post_id } => commands::print_json(
                enqueuer.status(job_id.map(JobId), post_id.map(PostId)),
            ),
            QueueCommand::Cancel { job_id, post_id } => {
                commands::cancel(&enqueuer, job_id, post_id)
            }
            QueueCommand::Fire { post_id } => {
                commands::print_json(enqueuer.fire(PostId(post_id)))
            }
            QueueCommand::Schedule {
                post_id,
                when,
                priority,
                source_file,
            } => commands::schedule(&enqueuer, post_id, &when, priority, source_file.as_deref()),
        },
        Commands::Ingest {
            file,
            content,
            platform,
        } => commands::ingest(&enqueuer, file, content, platform),
        Commands::Sync { file } => commands::sync(&enqueuer, &file),
        Commands::Auth {
            command:
                AuthCommand::Import {
                    platform,
                    access_token,
                    refresh_token,
                    expires_at,
                    user_sub,
                    user_email,
                },
        } => commands::import_credentials(
            &store,
            Credentials {
                platform,
                access_token,
                refresh_token,
                expires_at: None,
                user_sub,
                user_email,
            },
            expires_at.as_deref(),
        ),
        Commands::McpServer => run_mcp_server(enqueuer).await,
    }
}

async fn run_mcp_server(enqueuer: Enqueuer) -> Result<()> {
    use content_engine_mcp::{McpServer, ToolRegistry, ToolState};

    let mut server = McpServer::new(ToolRegistry::new(ToolState::new(enqueuer)));
    server
        .run_stdio()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_defaults() {
        let cli = Cli::try_parse_from(["content-engine", "worker"]).unwrap();
        assert_eq!(cli.max_attempts, DEFAULT_MAX_ATTEMPTS);
        match cli.command {
            Commands::Worker {
                continuous,
                dry_run,
                poll_interval,
                ..
            } => {
                assert!(!continuous);
                assert!(!dry_run);
                assert_eq!(poll_interval, 30);
            }
            _ => panic!("expected worker command"),
        }
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        assert!(Cli::try_parse_from(["content-engine", "--max-attempts", "0", "worker"]).is_err());
    }

    #[test]
    fn test_cancel_needs_exactly_one_id() {
        assert!(Cli::try_parse_from(["content-engine", "queue", "cancel"]).is_err());
        assert!(
            Cli::try_parse_from([
                "content-engine",
                "queue",
                "cancel",
                "--job-id",
                "1",
                "--post-id",
                "2"
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["content-engine", "queue", "cancel", "--post-id", "2"]).is_ok());
    }

    #[test]
    fn test_ingest_platform_parses() {
        let cli = Cli::try_parse_from([
            "content-engine",
            "ingest",
            "--content",
            "hi",
            "--platform",
            "blog",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest { platform, file, .. } => {
                assert_eq!(platform, Platform::Blog);
                assert!(file.is_none());
            }
            _ => panic!("expected ingest command"),
        }
        assert!(Cli::try_parse_from(["content-engine", "ingest"]).is_err());
    }
}

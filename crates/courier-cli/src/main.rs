//! Courier CLI tool.

use clap::{Parser, Subcommand};
use courier_core::{JobState, Outcome, SubscriptionId, Topic};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier job queue and broadcast CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "COURIER_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Admin token for broadcast and stats
    #[arg(long, env = "COURIER_ADMIN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce, claim and finish jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Broadcast a message to real-time clients
    Broadcast {
        /// Message; sent as JSON when it parses as JSON
        message: String,
        /// Target topic
        #[arg(long, conflicts_with = "user_id")]
        topic: Option<Topic>,
        /// Target a single user's topic
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Show real-time connection statistics
    Stats,
    /// Subscribe to topics and print every message received
    Listen {
        /// Topic to subscribe to (repeatable)
        #[arg(long = "topic")]
        topics: Vec<Topic>,
        /// Connect as this user
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Validate a service configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = courier_config::service::DEFAULT_CONFIG_PATH)]
        path: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Queue a job
    Enqueue {
        subscription: SubscriptionId,
        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,
    },
    /// Claim the oldest pending job
    Claim {
        subscription: SubscriptionId,
        /// Claimant name
        #[arg(long)]
        agent: String,
    },
    /// Report the outcome of a claimed job
    Report {
        /// Job ID
        id: String,
        /// completed or failed
        outcome: Outcome,
        /// Failure reason
        #[arg(long)]
        error: Option<String>,
    },
    /// Show job details
    Show {
        /// Job ID
        id: String,
    },
    /// List jobs of a subscription
    List {
        subscription: SubscriptionId,
        /// Only jobs in this state
        #[arg(long)]
        state: Option<JobState>,
        /// Maximum number of jobs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Count pending jobs
    Pending { subscription: SubscriptionId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Validate { path } = &cli.command {
        return commands::validate(path);
    }
    let client = ApiClient::new(&cli.api_url, cli.token)?;

    match cli.command {
        Commands::Jobs { command } => match command {
            JobCommands::Enqueue {
                subscription,
                payload,
            } => commands::jobs::enqueue(&client, &subscription, &payload).await?,
            JobCommands::Claim {
                subscription,
                agent,
            } => commands::jobs::claim(&client, &subscription, &agent).await?,
            JobCommands::Report { id, outcome, error } => {
                commands::jobs::report(&client, &id, outcome, error).await?
            }
            JobCommands::Show { id } => commands::jobs::show(&client, &id).await?,
            JobCommands::List {
                subscription,
                state,
                limit,
            } => commands::jobs::list(&client, &subscription, state, limit).await?,
            JobCommands::Pending { subscription } => {
                commands::jobs::pending(&client, &subscription).await?
            }
        },
        Commands::Broadcast {
            message,
            topic,
            user_id,
        } => commands::broadcast(&client, topic, user_id, &message).await?,
        Commands::Stats => commands::stats(&client).await?,
        Commands::Listen { topics, user_id } => {
            commands::listen::run(&client, &topics, user_id.as_deref()).await?
        }
        Commands::Validate { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_outcome_and_rejects_unknown() {
        let cli = Cli::try_parse_from(["courier", "jobs", "report", "abc", "failed", "--error", "boom"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Jobs {
                command: JobCommands::Report {
                    outcome: Outcome::Failed,
                    ..
                }
            }
        ));
        assert!(Cli::try_parse_from(["courier", "jobs", "report", "abc", "done"]).is_err());
    }

    #[test]
    fn rejects_invalid_subscription() {
        assert!(Cli::try_parse_from(["courier", "jobs", "pending", "a/b"]).is_err());
    }
}

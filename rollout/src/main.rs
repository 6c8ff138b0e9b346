use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common_redis::RedisClient;
use envconfig::Envconfig;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use rollout::config::Config;
use rollout::flags::flag_service::Rollout;

#[derive(Parser)]
#[command(version, about = "Inspect and change rollout flags stored in redis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every cataloged flag
    List,
    /// Print a flag's percentage, users, groups and data as JSON
    Show { flag: String },
    /// Evaluate a flag, optionally for an actor id
    Check {
        flag: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Evaluate every cataloged flag, optionally for an actor id
    States {
        #[arg(long)]
        actor: Option<String>,
    },
    /// Turn a flag on for everyone
    Activate { flag: String },
    /// Reset a flag's percentage, users, groups and data
    Deactivate { flag: String },
    /// Roll a flag out to a percentage of actors
    Percentage { flag: String, percentage: f64 },
    /// Add actor ids to a flag's allow-list
    AddUsers {
        flag: String,
        #[arg(required = true)]
        users: Vec<String>,
    },
    /// Remove actor ids from a flag's allow-list
    RemoveUsers {
        flag: String,
        #[arg(required = true)]
        users: Vec<String>,
    },
    /// Enable a flag for a named group
    AddGroup { flag: String, group: String },
    /// Disable a flag for a named group
    RemoveGroup { flag: String, group: String },
    /// Merge a JSON object into a flag's metadata
    SetData { flag: String, json: String },
    /// Reset a flag's metadata to {}
    ClearData { flag: String },
    /// Remove a flag entirely
    Delete { flag: String },
    /// Remove every flag
    Clear,
}

fn init_tracing(debug: bool) {
    let base_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    let log_layer = if debug {
        base_layer
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        base_layer
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

async fn run(rollout: Rollout<str>, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            for name in rollout.features().await? {
                println!("{name}");
            }
        }
        Commands::Show { flag } => {
            let snapshot = rollout.get(&flag).await?.snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Check { flag, actor } => {
            println!("{}", rollout.is_active(&flag, actor.as_deref()).await?);
        }
        Commands::States { actor } => {
            let states = rollout.feature_states(actor.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
        Commands::Activate { flag } => rollout.activate(&flag).await?,
        Commands::Deactivate { flag } => rollout.deactivate(&flag).await?,
        Commands::Percentage { flag, percentage } => {
            rollout.activate_percentage(&flag, percentage).await?
        }
        Commands::AddUsers { flag, users } => {
            let users: Vec<&str> = users.iter().map(String::as_str).collect();
            rollout.activate_users(&flag, &users).await?
        }
        Commands::RemoveUsers { flag, users } => {
            let users: Vec<&str> = users.iter().map(String::as_str).collect();
            rollout.deactivate_users(&flag, &users).await?
        }
        Commands::AddGroup { flag, group } => rollout.activate_group(&flag, &group).await?,
        Commands::RemoveGroup { flag, group } => rollout.deactivate_group(&flag, &group).await?,
        Commands::SetData { flag, json } => {
            let data: serde_json::Value =
                serde_json::from_str(&json).context("flag data must be valid JSON")?;
            if !data.is_object() {
                anyhow::bail!("flag data must be a JSON object");
            }
            rollout.set_feature_data(&flag, data).await?
        }
        Commands::ClearData { flag } => rollout.clear_feature_data(&flag).await?,
        Commands::Delete { flag } => rollout.delete(&flag).await?,
        Commands::Clear => rollout.clear().await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::init_from_env().context("Invalid configuration")?;

    init_tracing(*config.debug);

    let client = RedisClient::with_config(
        config.redis_url.clone(),
        config.redis_response_timeout(),
        config.redis_connection_timeout(),
    )
    .await
    .context("failed to connect to redis")?;

    let rollout = Rollout::new(Arc::new(client), config.options());
    if let Err(e) = run(rollout, cli.command).await {
        tracing::error!(error = %e, "command failed");
        return Err(e);
    }
    Ok(())
}

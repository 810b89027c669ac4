//! vrclink: VRChat friend presence from the terminal
//!
//! Main binary with subcommands:
//! - `watch`: Connect to the pipeline and log friend activity
//! - `friends`: Print the friend list once

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

mod friends;
mod login;
mod watch;

#[derive(Parser)]
#[command(name = "vrclink")]
#[command(about = "VRChat friend presence client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Account options shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
struct Account {
    /// Username or email
    #[arg(long, env = "VRC_USERNAME")]
    username: String,

    /// Password (prompted when omitted)
    #[arg(long, env = "VRC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// TOTP code for two-factor accounts (prompted when required and omitted)
    #[arg(long, env = "VRC_TOTP_CODE")]
    totp_code: Option<String>,

    /// REST API base URL
    #[arg(long, env = "VRC_API_BASE", default_value = vrclink_api::DEFAULT_API_BASE)]
    api_base: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the pipeline and log friend activity until interrupted
    Watch {
        #[command(flatten)]
        account: Account,

        /// Pipeline WebSocket URL
        #[arg(
            long,
            env = "VRC_PIPELINE_URL",
            default_value = vrclink_pipeline::DEFAULT_PIPELINE_URL
        )]
        pipeline_url: String,

        /// Reconnect when the connection drops.
        /// Accepts "1", "true", "yes", "on" or "0", "false", "no", "off".
        #[arg(
            long,
            env = "VRC_AUTO_RECONNECT",
            value_parser = parse_bool_env,
            action = clap::ArgAction::Set,
            default_value = "true"
        )]
        auto_reconnect: bool,

        /// Seconds to wait before reconnecting
        #[arg(long, default_value = "2")]
        reconnect_delay: u64,
    },

    /// Print the friend list and exit
    Friends {
        #[command(flatten)]
        account: Account,

        /// Include offline friends
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vrclink=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            account,
            pipeline_url,
            auto_reconnect,
            reconnect_delay,
        } => {
            let client = login::login(&account).await?;
            let config = vrclink_pipeline::SupervisorConfig::default()
                .with_pipeline_url(pipeline_url)
                .with_auto_reconnect(auto_reconnect)
                .with_reconnect_delay(std::time::Duration::from_secs(reconnect_delay));
            watch::run(client, config).await
        }
        Commands::Friends { account, offline } => {
            let client = login::login(&account).await?;
            friends::run(&client, offline).await
        }
    }
}

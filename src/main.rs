//! topicbus CLI - talks to a `gameapctl ui` server over its topic WebSocket.
//!
//! This is the binary entry point. See the `topicbus` library for the bus
//! itself.

use anyhow::{Context, Result};
use mimalloc::MiMalloc;
use std::time::Duration;
use topicbus::{commands, Bus, BusConfig};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "topicbus")]
#[command(version = VERSION)]
#[command(about = "Topic-multiplexed WebSocket client for gameapctl")]
struct Cli {
    /// WebSocket endpoint (overrides config and TOPICBUS_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Seconds to wait for the connection and for each reply
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the first reply
    Request {
        /// Topic to publish on and listen to
        topic: String,
        /// Message text sent as the frame value
        message: String,
    },
    /// Send one message and print every reply until the server ends the topic
    Stream {
        topic: String,
        message: String,
    },
    /// Print every frame on a topic until Ctrl-C
    Watch { topic: String },
    /// Show the status of the GameAP services
    Services,
    /// Show the server's node description
    NodeInfo,
    /// Ask the server to shut down
    Exit,
    /// Print the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    let builder_env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(builder_env);

    if let Ok(path) = std::env::var("TOPICBUS_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }

    builder.format_timestamp_secs().init();
    Ok(())
}

fn load_config(endpoint: Option<String>) -> Result<BusConfig> {
    let mut config = BusConfig::load()?;
    // gameapctl omits `value` on `end` frames.
    config.accept_missing_value = true;
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = load_config(cli.endpoint)?;
    let timeout = Duration::from_secs(cli.timeout);

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let bus = Bus::builder(config)
        .on_close(|reason| log::info!("Connection closed: {}", reason))
        .connect();

    let result = match cli.command {
        Commands::Request { topic, message } => {
            commands::messaging::request(&bus, &topic, &message, timeout).await
        }
        Commands::Stream { topic, message } => {
            commands::messaging::stream(&bus, &topic, &message, timeout).await
        }
        Commands::Watch { topic } => commands::messaging::watch(&bus, &topic, timeout).await,
        Commands::Services => commands::services::print_status(&bus, timeout).await,
        Commands::NodeInfo => commands::services::node_info(&bus, timeout).await,
        Commands::Exit => commands::messaging::exit(&bus, timeout).await,
        Commands::Config => Ok(()),
    };

    bus.close();
    result
}

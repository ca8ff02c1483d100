use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voicelink::commands::{ask_once, run_chat};
use voicelink::{Config, StreamingCompletionController};

#[derive(Parser)]
#[command(name = "voicelink")]
#[command(version = "0.1.0")]
#[command(about = "Domain-grounded streaming chat assistant", long_about = None)]
struct Cli {
    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session (default)
    Chat {
        /// Starting domain: normal, healthcare or finance
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// Ask a single question and print the reply
    Ask {
        text: String,
        #[arg(short, long)]
        domain: Option<String>,
        /// Print the `{reply}` / `{error}` JSON body instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Chat { domain: None }) {
        Commands::Chat { domain } => {
            let controller = build_controller(&config)?;
            run_chat(controller, domain).await
        }
        Commands::Ask { text, domain, json } => {
            let controller = build_controller(&config)?;
            ask_once(controller, text, domain, json).await
        }
        Commands::Config { init } => show_config(config, init),
    }
}

fn build_controller(config: &Config) -> Result<StreamingCompletionController> {
    if !config.has_api_key() {
        warn!(env = %config.backend.api_key_env, "no API key configured");
    }
    info!(
        provider = ?config.backend.provider,
        persona = %config.chat.persona,
        "starting voicelink"
    );
    StreamingCompletionController::from_config(config).context("Failed to initialise completion backend")
}

fn show_config(config: Config, init: bool) -> Result<()> {
    let path = config.config_path();
    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            let fresh = Config {
                voicelink_home: config.voicelink_home.clone(),
                ..Config::default()
            };
            fresh.save()?;
            println!("Wrote default config to {}", path.display());
        }
    }

    let mut shown = config;
    if shown.backend.api_key.is_some() {
        shown.backend.api_key = Some("********".to_string());
    }
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&shown).context("Failed to serialize config")?);
    for (domain, source) in shown.knowledge_sources() {
        let status = if source.exists() { "found" } else { "missing" };
        println!("# {} knowledge base: {} ({})", domain, source.display(), status);
    }
    Ok(())
}

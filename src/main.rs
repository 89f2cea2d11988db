//! chatrelay - Chat relay for DeepSeek, OpenAI and Anthropic
//!
//! A small server that forwards browser chat transcripts to the selected
//! provider using the caller's own API key.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::Config;
use chatrelay::relay::{provider, ModelSelector};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Chat relay for DeepSeek, OpenAI and Anthropic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show selectable models and their upstream endpoints
    Models {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatrelay={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let found = Config::load_optional(&config)?;
            let missing = found.is_none();
            let mut loaded = found.unwrap_or_default();
            init_tracing(&loaded.logging.level);
            if missing {
                tracing::warn!(config = %config, "Config file not found, using defaults");
            } else {
                tracing::info!(config = %config, "Loaded configuration");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            chatrelay::relay::run_server(loaded).await
        }

        Commands::Check { config } => {
            init_tracing("warn");
            let (loaded, sources) = Config::from_file_with_sources(&config)?;
            let policy = loaded.relay.retry_policy();

            println!("Configuration OK: {}", config);
            println!("  listen:          {}", loaded.server.listen);
            println!("  max attempts:    {}", policy.max_attempts);
            println!("  attempt timeout: {}s", policy.attempt_timeout.as_secs());
            println!("  backoff step:    {}ms", policy.backoff_step.as_millis());
            println!("  request deadline: {}s", policy.deadline().as_secs());
            for (name, source) in sources {
                println!("  endpoint {:<10} {}", name, source);
            }
            Ok(())
        }

        Commands::Models { config } => {
            init_tracing("warn");
            let loaded = Config::load_or_default(&config)?;
            let endpoints = loaded.endpoints();

            println!(
                "{:<10} {:<12} {:<24} {:>10}  ENDPOINT",
                "MODEL", "ALIASES", "UPSTREAM", "MAX_TOKENS"
            );
            for model in ModelSelector::ALL {
                println!(
                    "{:<10} {:<12} {:<24} {:>10}  {}",
                    model.id(),
                    model.aliases().join(","),
                    provider::wire_model(model),
                    provider::max_tokens(model),
                    endpoints.url(model)
                );
            }
            Ok(())
        }
    }
}

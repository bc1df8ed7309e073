use anyhow::{Context, Result};
use atalaya::config::{Config, ConfigError};
use atalaya::Atalaya;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atalaya")]
#[command(about = "Connection supervision and topology detection for MongoDB and Redis backends")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Atalaya Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the configured backends and report their health until Ctrl-C
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
    },
    /// Print the composite status as JSON
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
        /// How long to wait for backends to connect and be classified
        #[arg(long, default_value_t = 3000)]
        wait_ms: u64,
    },
    /// Generate example configuration files
    Config {
        /// Deployment mode (standalone, replicated, cluster or sentinel)
        #[arg(short, long)]
        mode: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await?,
        Commands::Status { config, wait_ms } => print_status(config, wait_ms).await?,
        Commands::Config { mode, output } => generate_config(mode, output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load_from_file(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    config.apply_env_overrides();
    config
        .validate()
        .context("Configuration is invalid after applying environment overrides")?;
    Ok(config)
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    init_logging(&config)?;

    info!("Starting atalaya v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);

    let report_every = Duration::from_secs(config.startup.report_interval_sec);
    let atalaya = Atalaya::new(config);
    atalaya
        .connect_all()
        .await
        .context("Failed to start backend supervision")?;

    let mut ticker = tokio::time::interval(report_every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let health = atalaya.health();
                match serde_json::to_string(&health.checks) {
                    Ok(checks) if health.status.is_healthy() => info!("Health: {} {}", health.status, checks),
                    Ok(checks) => warn!("Health: {} {}", health.status, checks),
                    Err(e) => warn!("Failed to serialize health checks: {}", e),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    atalaya.disconnect_all().await;
    Ok(())
}

async fn print_status(config_path: PathBuf, wait_ms: u64) -> Result<()> {
    let config = load_config(&config_path)?;
    init_logging(&config)?;

    let atalaya = Atalaya::new(config);
    atalaya
        .connect_all()
        .await
        .context("Failed to start backend supervision")?;

    if !atalaya.wait_until_settled(Duration::from_millis(wait_ms)).await {
        warn!("Backends did not settle within {}ms", wait_ms);
    }

    let composite = atalaya.composite_status().await;
    let health = atalaya.health();
    let report = serde_json::json!({
        "status": composite,
        "health": health,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    atalaya.disconnect_all().await;
    Ok(())
}

fn generate_config(mode: String, output: PathBuf) -> Result<()> {
    println!("Generating {} configuration file: {:?}", mode, output);

    Config::create_example_config(&output, &mode).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  atalaya run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Application: {} ({})", config.application.name, config.application.environment);

            match &config.document {
                Some(document) => println!(
                    "  Document store: {} (required: {})",
                    atalaya::utils::redact_credentials(&document.uri),
                    document.required
                ),
                None => println!("  Document store: not configured"),
            }

            match &config.cache {
                Some(cache) if !cache.cluster_nodes.is_empty() => {
                    println!("  Cache store: cluster, {} seed nodes", cache.cluster_nodes.len());
                    for (i, node) in cache.cluster_nodes.iter().enumerate() {
                        println!("    {}: {}", i + 1, node);
                    }
                }
                Some(cache) if !cache.sentinels.is_empty() => {
                    println!(
                        "  Cache store: sentinel-managed primary '{}', {} sentinels",
                        cache.sentinel_master,
                        cache.sentinels.len()
                    );
                    for (i, sentinel) in cache.sentinels.iter().enumerate() {
                        println!("    {}: {}", i + 1, sentinel);
                    }
                }
                Some(cache) => match cache.url.as_deref() {
                    Some(url) => println!("  Cache store: {}", atalaya::utils::redact_credentials(url)),
                    None => println!("  Cache store: not configured"),
                },
                None => println!("  Cache store: not configured"),
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("atalaya v{}", env!("CARGO_PKG_VERSION"));
    println!("Connection supervision and topology detection for MongoDB and Redis backends");
    println!();
    println!(
        "Built with Rust {}",
        option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
    );
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Standalone, replica set and sharded MongoDB detection");
    println!("  • Standalone, replicated, cluster and sentinel Redis detection");
    println!("  • Heartbeat monitoring with bounded linear backoff");
    println!("  • Composite status and liveness reports");
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}

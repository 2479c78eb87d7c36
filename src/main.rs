//! polbridge binary entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;
use polbridge::{server, Config, Environment};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Version from Cargo.toml.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "polbridge")]
#[command(version = VERSION)]
#[command(about = "Line-protocol bridge between a game server and Lua scripts")]
struct Cli {
    /// Config file (default: ./polbridge.json, then the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to listen on, e.g. 127.0.0.1:6060.
    #[arg(long)]
    listen: Option<String>,
    /// Root directory for scripts.
    #[arg(long)]
    scripts_root: Option<PathBuf>,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("POLBRIDGE_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .map_err(|e| anyhow::anyhow!("Failed to create log file at {path}: {e}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let environment = Environment::current();
    log::info!("polbridge {VERSION} ({environment})");

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_cli(cli.listen, cli.scripts_root);

    server::run(config, environment).await
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use pim6d::config::Config;
use pim6d::daemon;
use pim6d::logging::Logger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Run the PIM daemon (needs CAP_NET_RAW)
    Run {
        /// JSON5 configuration file; defaults apply when omitted
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Load and validate a configuration file, then exit
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run { config } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => Config::default(),
            };
            let logger = if config.json_logs {
                Logger::stderr_json()
            } else {
                Logger::stderr()
            };
            logger.set_global_level(config.severity());
            daemon::run(config, logger).await?;
        }
        Command::CheckConfig { config } => {
            let parsed = load_config(&config)?;
            println!(
                "{}: OK ({} interfaces)",
                config.display(),
                parsed.interfaces.len()
            );
        }
    }

    Ok(())
}

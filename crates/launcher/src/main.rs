//! shotq launcher binary.
//!
//! Reads a story config, compiles its shots into ComfyUI jobs and queues
//! them on the configured worker hosts. Also exposes the line-level config
//! edits (status, disable, enable) used between runs.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod config;

use cli::Cli;
use config::LauncherConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(cli.verbose).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = LauncherConfig::from_env()?;
    let config_path = cli.config.unwrap_or_else(|| config.config_path.clone());
    tracing::debug!(config = %config_path.display(), "Launcher starting");

    commands::execute(cli.command, config_path, &config).await
}

/// Log directives used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "shotq_launcher=debug,shotq_pipeline=debug,shotq_core=debug,shotq_comfyui=debug"
    } else {
        "shotq_launcher=info,shotq_pipeline=info,shotq_core=info,shotq_comfyui=info"
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::EnvFilter;

    use super::*;

    #[test]
    fn default_filter_covers_every_workspace_crate() {
        for (verbose, level) in [(false, "info"), (true, "debug")] {
            let directives = default_filter(verbose);
            for krate in ["shotq_launcher", "shotq_pipeline", "shotq_core", "shotq_comfyui"] {
                assert!(
                    directives.split(',').any(|d| d == format!("{krate}={level}")),
                    "{krate} missing from {directives}"
                );
            }
            assert!(EnvFilter::try_new(directives).is_ok());
        }
    }
}

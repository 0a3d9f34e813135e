//! confsync — keep local configuration files in sync with a key/value
//! backend.
//!
//! # Usage
//!
//! ```text
//! confsync --onetime --backend env \
//!          --confdir /etc/confsync/conf.d --template-dir /etc/confsync/templates
//! confsync --backend file --backend-file /etc/confsync/backend.toml --interval 60
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use confsync_backends::{EnvClient, FileClient};
use confsync_core::{Config, StoreClient};
use confsync_processor::Processor;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "confsync",
    version,
    about = "Keep local configuration files in sync with a key/value backend",
    long_about = None,
)]
struct Cli {
    /// Directory holding template resource descriptors (*.toml).
    #[arg(long, default_value = "/etc/confsync/conf.d")]
    confdir: PathBuf,

    /// Directory holding source templates.
    #[arg(long, default_value = "/etc/confsync/templates")]
    template_dir: PathBuf,

    /// Backend driver.
    #[arg(long, value_enum, default_value = "env")]
    backend: Backend,

    /// TOML document served by the file backend.
    #[arg(long)]
    backend_file: Option<PathBuf>,

    /// Run every template resource once and exit.
    #[arg(long)]
    onetime: bool,

    /// Force watch mode.
    #[arg(long, conflicts_with = "onetime")]
    watch: bool,

    /// Force interval mode with this many seconds between cycles.
    #[arg(long, conflicts_with_all = ["onetime", "watch"])]
    interval: Option<u64>,

    /// Override every resource's key prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Render and compare, but never write destinations.
    #[arg(long)]
    noop: bool,

    /// Skip check and reload commands.
    #[arg(long)]
    sync_only: bool,

    /// Keep stage files after a swap.
    #[arg(long)]
    keep_stage_file: bool,

    /// OpenPGP private key file; enables the c* template functions.
    #[arg(long)]
    pgp_private_key: Option<PathBuf>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Backend {
    /// Process environment.
    Env,
    /// A single TOML document (see --backend-file).
    File,
}

impl Cli {
    fn into_config(self) -> Result<(Config, Arc<dyn StoreClient>)> {
        let mut config = Config {
            onetime: self.onetime,
            watch_mode: self.watch,
            interval_mode: self.interval.is_some(),
            interval_secs: self.interval,
            prefix: self.prefix,
            conf_dir: self.confdir,
            template_dir: self.template_dir,
            keep_stage_file: self.keep_stage_file,
            noop: self.noop,
            sync_only: self.sync_only,
            ..Config::default()
        };

        if let Some(path) = &self.pgp_private_key {
            let key = std::fs::read(path)
                .with_context(|| format!("cannot read PGP private key {}", path.display()))?;
            config.pgp_private_key = Some(key);
        }

        let client: Arc<dyn StoreClient> = match self.backend {
            Backend::Env => Arc::new(EnvClient::new()),
            Backend::File => {
                let Some(path) = self.backend_file else {
                    bail!("--backend file requires --backend-file");
                };
                Arc::new(FileClient::new(path))
            }
        };

        Ok((config, client))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let (config, client) = cli.into_config()?;
    let onetime = config.onetime;

    let processor = Processor::new(config);
    processor
        .start(client)
        .await
        .context("processing failed")?;

    if !onetime {
        tokio::signal::ctrl_c()
            .await
            .context("ctrl-c handler failed")?;
        tracing::info!("received ctrl-c, shutting down");
        processor.stop().await;
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

//! Binary entry point for the cloudvol Docker volume plugin.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use cloudvol::config::{CloudvolConfig, ConfigError, ConfigOverrides, StorageMode};
use cloudvol::fs::HostFilesystem;
use cloudvol::gce::{GceDiskService, GceError};
use cloudvol::logging::{self, LoggingError};
use cloudvol::plugin::{self, PluginError};
use cloudvol::VolumeDriver;

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("backend error: {0}")]
    Backend(#[from] GceError),
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn overrides(cli: Cli) -> ConfigOverrides {
    ConfigOverrides {
        mode: cli.mode,
        port: cli.port,
        sock: cli.sock,
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = CloudvolConfig::load_without_cli_args()?.with_overrides(overrides(cli));
    config.validate()?;
    logging::init(&config.log_level)?;

    match config.storage_mode()? {
        StorageMode::Gce => serve_gce(&config).await,
    }
}

async fn serve_gce(config: &CloudvolConfig) -> Result<(), CliError> {
    let mount_root = config.mount_root_path()?;
    let target = config.listen_target()?;
    let service = GceDiskService::connect(&config.identity_overrides()).await?;
    let identity = service.identity().clone();
    let filesystem = match config.host_root_path() {
        Some(root) => {
            info!(%root, "running against host filesystem");
            HostFilesystem::rooted(root)
        }
        None => HostFilesystem::new(),
    };

    info!(mode = %config.mode, %mount_root, "starting volume plugin");
    let driver = Arc::new(VolumeDriver::new(service, filesystem, identity, mount_root));
    plugin::serve(plugin::router(driver), &target).await?;
    info!("volume plugin stopped");
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

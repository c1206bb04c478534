//! Command-line interface definitions for the `cloudvol` binary.
//!
//! This module centralises the clap parser so both the main binary and the
//! build script can reuse it when generating the manual page.

use clap::Parser;

/// Docker volume plugin backed by cloud persistent disks.
#[derive(Debug, Parser)]
#[command(
    name = "cloudvol",
    version,
    about = "Docker volume plugin backed by cloud persistent disks",
    long_about = "Serves the Docker volume plugin protocol. Volumes are cloud \
                  persistent disks that are attached to this instance, formatted \
                  and mounted on demand. Settings are read from cloudvol.toml and \
                  CLOUDVOL_* environment variables; the flags below override them."
)]
pub(crate) struct Cli {
    /// Storage backend to use.
    #[arg(long, value_name = "MODE")]
    pub(crate) mode: Option<String>,
    /// TCP port for the plugin endpoint.
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,
    /// Listen on a Unix socket instead of TCP.
    #[arg(long)]
    pub(crate) sock: bool,
}

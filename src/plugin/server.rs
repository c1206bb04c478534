//! Listener setup and graceful shutdown for the plugin endpoint.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal;
use tracing::{info, warn};

/// Where the plugin endpoint listens.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenTarget {
    /// TCP socket address.
    Tcp(SocketAddr),
    /// Unix domain socket path, typically under `/run/docker/plugins`.
    Unix(Utf8PathBuf),
}

/// Errors raised while binding or serving the plugin endpoint.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Raised when the listener cannot be bound.
    #[error("failed to listen on {target}: {source}")]
    Bind {
        /// Rendered listen target.
        target: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when the socket directory or a stale socket cannot be
    /// prepared.
    #[error("failed to prepare socket {path}: {source}")]
    Socket {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when the server stops with an error.
    #[error("plugin server failed: {0}")]
    Serve(#[source] io::Error),
}

/// Serves `app` on `target` until Ctrl+C or SIGTERM.
///
/// A Unix socket left over from a previous run is replaced.
///
/// # Errors
///
/// Returns [`PluginError`] when the listener cannot be set up or the server
/// fails.
pub async fn serve(app: Router, target: &ListenTarget) -> Result<(), PluginError> {
    match target {
        ListenTarget::Tcp(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| PluginError::Bind {
                    target: addr.to_string(),
                    source,
                })?;
            info!(%addr, "plugin listening on TCP");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(PluginError::Serve)
        }
        ListenTarget::Unix(path) => {
            prepare_socket(path)?;
            let listener = UnixListener::bind(path).map_err(|source| PluginError::Bind {
                target: path.to_string(),
                source,
            })?;
            info!(%path, "plugin listening on Unix socket");
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(PluginError::Serve);
            if let Err(err) = remove_stale(path) {
                warn!(%path, error = %err, "failed to remove socket on shutdown");
            }
            served
        }
    }
}

fn prepare_socket(path: &Utf8Path) -> Result<(), PluginError> {
    let socket_error = |source| PluginError::Socket {
        path: path.to_owned(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(socket_error)?;
    }
    remove_stale(path).map_err(socket_error)
}

fn remove_stale(path: &Utf8Path) -> io::Result<()> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(());
    };
    let dir_path = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())?;
    match dir.remove_file(name) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Resolves once the process receives Ctrl+C or SIGTERM.
///
/// A signal whose handler cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

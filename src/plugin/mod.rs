//! Docker volume plugin endpoint.
//!
//! Exposes a [`VolumeDriver`] through the Docker volume plugin protocol:
//! JSON bodies are POSTed to `/Plugin.Activate` and `/VolumeDriver.*`, and
//! every answer is a JSON document whose `Err` field is empty on success.
//! Failures are reported in-band with HTTP 200, as the protocol expects.

mod server;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{error, info};

use crate::disk::DiskService;
use crate::driver::VolumeDriver;
use crate::fs::Filesystem;

pub use server::{ListenTarget, PluginError, serve, shutdown_signal};
pub use types::{
    ActivateResponse, Capabilities, PluginResponse, VolumeInfo, VolumeRequest,
};

/// Media type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Scope advertised to Docker: disks are visible from every node in the zone.
pub const VOLUME_SCOPE: &str = "global";

/// Subsystem implemented by the plugin.
pub const IMPLEMENTS: &str = "VolumeDriver";

type Shared<D, F> = Arc<VolumeDriver<D, F>>;

/// Builds the plugin router around `driver`.
#[must_use]
pub fn router<D, F>(driver: Shared<D, F>) -> Router
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    Router::new()
        .route("/Plugin.Activate", post(|| async { activate() }))
        .route(
            "/VolumeDriver.Capabilities",
            post(|| async { capabilities() }),
        )
        .route("/VolumeDriver.Create", post(create::<D, F>))
        .route("/VolumeDriver.Remove", post(remove::<D, F>))
        .route("/VolumeDriver.Mount", post(mount::<D, F>))
        .route("/VolumeDriver.Unmount", post(unmount::<D, F>))
        .route("/VolumeDriver.Path", post(path::<D, F>))
        .route("/VolumeDriver.Get", post(get::<D, F>))
        .route("/VolumeDriver.List", post(list::<D, F>))
        .with_state(driver)
}

fn reply<T: Serialize>(body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], bytes).into_response(),
        Err(err) => fail(&format!("failed to encode response: {err}")),
    }
}

fn fail(message: &str) -> Response {
    error!(error = message, "request failed");
    let body = PluginResponse::error(message);
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], bytes).into_response()
}

/// Decodes a request body; an empty body is an empty request.
fn decode(endpoint: &str, body: &Bytes) -> Result<VolumeRequest, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VolumeRequest::default());
    }
    let request: VolumeRequest = serde_json::from_slice(body)
        .map_err(|err| fail(&format!("invalid {endpoint} request: {err}")))?;
    info!(endpoint, volume = %request.name, id = ?request.id, "request received");
    Ok(request)
}

fn activate() -> Response {
    info!("plugin activated");
    reply(&ActivateResponse {
        implements: vec![IMPLEMENTS.to_owned()],
    })
}

fn capabilities() -> Response {
    reply(&PluginResponse {
        capabilities: Some(Capabilities {
            scope: VOLUME_SCOPE.to_owned(),
        }),
        ..PluginResponse::default()
    })
}

async fn create<D, F>(State(driver): State<Shared<D, F>>, body: Bytes) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    let request = match decode("create", &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let options = request.opts.unwrap_or_default();
    match driver.create(&request.name, &options).await {
        Ok(volume) => {
            info!(volume = %volume.name, path = ?volume.path, "volume created");
            reply(&PluginResponse {
                volume: Some(VolumeInfo::summary(&volume)),
                ..PluginResponse::default()
            })
        }
        Err(err) => fail(&format!("error creating volume '{}': {err}", request.name)),
    }
}

async fn remove<D, F>(State(driver): State<Shared<D, F>>, body: Bytes) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    let request = match decode("remove", &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.remove(&request.name).await {
        Ok(()) => {
            info!(volume = %request.name, "volume removed");
            reply(&PluginResponse::default())
        }
        Err(err) => fail(&format!("error removing volume '{}': {err}", request.name)),
    }
}

async fn mount<D, F>(State(driver): State<Shared<D, F>>, body: Bytes) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    let request = match decode("mount", &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.mount(&request.name).await {
        Ok(path) => {
            info!(volume = %request.name, %path, "volume mounted");
            reply(&PluginResponse {
                mountpoint: Some(path.into_string()),
                ..PluginResponse::default()
            })
        }
        Err(err) => fail(&format!("error mounting volume '{}': {err}", request.name)),
    }
}

async fn unmount<D, F>(State(driver): State<Shared<D, F>>, body: Bytes) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    let request = match decode("unmount", &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.unmount(&request.name).await {
        Ok(()) => {
            info!(volume = %request.name, "volume unmounted");
            reply(&PluginResponse::default())
        }
        Err(err) => fail(&format!("error unmounting volume '{}': {err}", request.name)),
    }
}

async fn path<D, F>(State(driver): State<Shared<D, F>>, body: Bytes) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    let request = match decode("path", &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.get(&request.name).await {
        Ok(volume) => reply(&PluginResponse {
            mountpoint: volume.path.map(Utf8PathBuf::into_string),
            ..PluginResponse::default()
        }),
        Err(err) => fail(&format!("error getting volume '{}': {err}", request.name)),
    }
}

async fn get<D, F>(State(driver): State<Shared<D, F>>, body: Bytes) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    let request = match decode("get", &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.get(&request.name).await {
        Ok(volume) => reply(&PluginResponse {
            volume: Some(VolumeInfo::detailed(&volume)),
            ..PluginResponse::default()
        }),
        Err(err) => fail(&format!("error getting volume '{}': {err}", request.name)),
    }
}

async fn list<D, F>(State(driver): State<Shared<D, F>>) -> Response
where
    D: DiskService + Send + Sync + 'static,
    F: Filesystem + Send + Sync + 'static,
{
    match driver.list().await {
        Ok(volumes) => {
            info!(count = volumes.len(), "volumes listed");
            reply(&PluginResponse {
                volumes: Some(volumes.iter().map(VolumeInfo::summary).collect()),
                ..PluginResponse::default()
            })
        }
        Err(err) => fail(&format!("error listing volumes: {err}")),
    }
}

//! Compute Engine adapter tests against a local emulator of the metadata
//! server and the zonal REST API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use camino::Utf8PathBuf;
use cloudvol::disk::{AttachRequest, DiskService, DiskSpec, OperationStatus};
use cloudvol::gce::{GceDiskService, GceError, IdentityOverrides};
use cloudvol::test_support::MemoryFilesystem;
use cloudvol::VolumeDriver;
use serde_json::{Value, json};
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";
const ZONE_PREFIX: &str = "projects/proj/zones/zone-a/";
const LINK_BASE: &str = "https://www.googleapis.com/compute/v1/projects/proj/zones/zone-a";

#[derive(Debug)]
struct Recorded {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Option<Value>,
}

#[derive(Debug, Default)]
struct Emulator {
    token_requests: AtomicUsize,
    metadata_paths: Mutex<Vec<String>>,
    compute: Mutex<Vec<Recorded>>,
}

impl Emulator {
    fn metadata_paths(&self) -> Vec<String> {
        self.metadata_paths.lock().expect("metadata log").clone()
    }

    fn last_compute(&self) -> Recorded {
        self.compute
            .lock()
            .expect("compute log")
            .pop()
            .expect("a compute request was recorded")
    }
}

fn disk_json(name: &str) -> Value {
    json!({
        "name": name,
        "selfLink": format!("{LINK_BASE}/disks/{name}"),
        "sizeGb": "10",
        "users": [format!("{LINK_BASE}/instances/node-1")]
    })
}

fn operation_json(name: &str, status: &str) -> Value {
    json!({
        "name": name,
        "targetLink": format!("{LINK_BASE}/disks/data"),
        "status": status
    })
}

async fn metadata(
    State(emulator): State<Arc<Emulator>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = raw.trim_start_matches('/').to_owned();
    if headers.get("Metadata-Flavor").and_then(|value| value.to_str().ok()) != Some("Google") {
        return (StatusCode::FORBIDDEN, "missing Metadata-Flavor").into_response();
    }
    emulator
        .metadata_paths
        .lock()
        .expect("metadata log")
        .push(path.clone());
    match path.as_str() {
        "project/project-id" => "proj".into_response(),
        "instance/zone" => "projects/123456/zones/zone-a".into_response(),
        "instance/name" => "node-1".into_response(),
        "instance/service-accounts/default/token" => {
            emulator.token_requests.fetch_add(1, Ordering::SeqCst);
            Json(json!({"access_token": TOKEN, "expires_in": 3600, "token_type": "Bearer"}))
                .into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn compute(
    State(emulator): State<Arc<Emulator>>,
    method: Method,
    Path(raw): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let expected = format!("Bearer {TOKEN}");
    let authorised = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorised {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    }
    let Some(rest) = raw
        .trim_start_matches('/')
        .strip_prefix(ZONE_PREFIX)
        .map(str::to_owned)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let page_token = query.get("pageToken").cloned();
    emulator.compute.lock().expect("compute log").push(Recorded {
        method: method.to_string(),
        path: rest.clone(),
        query,
        body: serde_json::from_slice(&body).ok(),
    });

    match (method.as_str(), rest.as_str()) {
        ("GET", "disks") => match page_token.as_deref() {
            None => Json(json!({
                "items": [disk_json("a"), disk_json("b")],
                "nextPageToken": "page-2"
            }))
            .into_response(),
            Some("page-2") => Json(json!({"items": [disk_json("data")]})).into_response(),
            Some(_) => StatusCode::BAD_REQUEST.into_response(),
        },
        ("POST", "disks") => Json(operation_json("op-insert", "PENDING")).into_response(),
        ("GET", "disks/data") => Json(disk_json("data")).into_response(),
        ("DELETE", "disks/locked") => {
            (StatusCode::INTERNAL_SERVER_ERROR, "disk is locked").into_response()
        }
        ("DELETE", _) => Json(operation_json("op-delete", "RUNNING")).into_response(),
        ("GET", "instances/node-1") => Json(json!({
            "name": "node-1",
            "selfLink": format!("{LINK_BASE}/instances/node-1"),
            "disks": [
                {"deviceName": "persistent-disk-0", "source": format!("{LINK_BASE}/disks/boot")},
                {"deviceName": "data-dev", "source": format!("{LINK_BASE}/disks/data")}
            ]
        }))
        .into_response(),
        ("POST", "instances/node-1/attachDisk") => {
            Json(operation_json("op-attach", "RUNNING")).into_response()
        }
        ("POST", "instances/node-1/detachDisk") => {
            Json(operation_json("op-detach", "RUNNING")).into_response()
        }
        ("GET", "diskTypes") => Json(json!({
            "items": [{"name": "pd-ssd", "selfLink": format!("{LINK_BASE}/diskTypes/pd-ssd")}]
        }))
        .into_response(),
        ("GET", op) if op.starts_with("operations/") => {
            Json(operation_json(op.trim_start_matches("operations/"), "DONE")).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_emulator() -> (Arc<Emulator>, String) {
    let emulator = Arc::new(Emulator::default());
    let app = Router::new()
        .route("/computeMetadata/v1/{*path}", get(metadata))
        .route("/compute/v1/{*path}", any(compute))
        .with_state(Arc::clone(&emulator));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind emulator");
    let addr = listener.local_addr().expect("emulator address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (emulator, format!("http://{addr}"))
}

async fn connect(base: &str, overrides: &IdentityOverrides) -> Result<GceDiskService, GceError> {
    GceDiskService::connect_with(
        overrides,
        &format!("{base}/computeMetadata/v1"),
        &format!("{base}/compute/v1"),
    )
    .await
}

async fn service() -> (Arc<Emulator>, GceDiskService) {
    let (emulator, base) = spawn_emulator().await;
    let service = connect(&base, &IdentityOverrides::default())
        .await
        .expect("identity discovered");
    (emulator, service)
}

#[tokio::test]
async fn identity_is_discovered_from_metadata() {
    let (emulator, service) = service().await;

    assert_eq!(
        service.identity().uri(),
        "projects/proj/zones/zone-a/instances/node-1"
    );
    assert_eq!(service.identity().zone(), "zone-a");
    assert_eq!(
        emulator.metadata_paths(),
        vec!["project/project-id", "instance/zone", "instance/name"]
    );
}

#[tokio::test]
async fn configured_identity_skips_metadata_lookups() {
    let (emulator, base) = spawn_emulator().await;
    let overrides = IdentityOverrides {
        project: Some(String::from("proj")),
        zone: Some(String::from("zone-a")),
        instance: Some(String::from("node-1")),
    };

    let service = connect(&base, &overrides).await.expect("no lookups needed");

    assert_eq!(service.identity().instance(), "node-1");
    assert!(emulator.metadata_paths().is_empty());
}

#[tokio::test]
async fn unreachable_metadata_value_is_reported() {
    let (_emulator, base) = spawn_emulator().await;

    let err = GceDiskService::connect_with(
        &IdentityOverrides::default(),
        &format!("{base}/elsewhere"),
        &format!("{base}/compute/v1"),
    )
    .await
    .expect_err("metadata path is not served");

    assert!(
        matches!(err, GceError::Metadata { ref path, .. } if path == "project/project-id"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn listing_follows_page_tokens_and_reuses_the_access_token() {
    let (emulator, service) = service().await;

    let disks = service.list_disks().await.expect("listing succeeds");
    let types = service.list_disk_types().await.expect("types listed");

    let names: Vec<&str> = disks.iter().map(|disk| disk.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "data"]);
    assert_eq!(types.len(), 1);
    assert_eq!(emulator.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_disk_is_absent_and_full_url_users_match() {
    let (_emulator, service) = service().await;

    assert_eq!(service.get_disk("nope").await.expect("lookup succeeds"), None);

    let disk = service
        .get_disk("data")
        .await
        .expect("lookup succeeds")
        .expect("disk exists");
    assert_eq!(disk.size_gb, 10);
    assert!(service.identity().is_attached(&disk.users));
}

#[tokio::test]
async fn missing_instance_is_an_api_error() {
    let (_emulator, service) = service().await;

    let err = service
        .get_instance("ghost")
        .await
        .expect_err("instance does not exist");

    assert!(
        matches!(err, GceError::Api { status: 404, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn attach_posts_device_name_and_source() {
    let (emulator, service) = service().await;
    let request = AttachRequest {
        device_name: String::from("data"),
        source: format!("{LINK_BASE}/disks/data"),
    };

    let operation = service
        .attach_disk("node-1", &request)
        .await
        .expect("attach accepted");

    assert_eq!(operation.status, OperationStatus::Running);
    let recorded = emulator.last_compute();
    assert_eq!(recorded.method, "POST");
    assert_eq!(recorded.path, "instances/node-1/attachDisk");
    assert_eq!(
        recorded.body,
        Some(json!({"deviceName": "data", "source": format!("{LINK_BASE}/disks/data")}))
    );

    let polled = service
        .get_operation(&operation)
        .await
        .expect("operation fetched");
    assert!(polled.is_done());
    assert_eq!(emulator.last_compute().path, "operations/op-attach");
}

#[tokio::test]
async fn detach_names_the_device_in_the_query() {
    let (emulator, service) = service().await;

    service
        .detach_disk("node-1", "data-dev")
        .await
        .expect("detach accepted");

    let recorded = emulator.last_compute();
    assert_eq!(recorded.path, "instances/node-1/detachDisk");
    assert_eq!(
        recorded.query.get("deviceName").map(String::as_str),
        Some("data-dev")
    );
}

#[tokio::test]
async fn create_sends_size_as_string_and_type_link() {
    let (emulator, service) = service().await;
    let spec = DiskSpec {
        name: String::from("fresh"),
        size_gb: 20,
        disk_type: Some(format!("{LINK_BASE}/diskTypes/pd-ssd")),
    };

    let operation = service.create_disk(&spec).await.expect("create accepted");

    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(
        emulator.last_compute().body,
        Some(json!({
            "name": "fresh",
            "sizeGb": "20",
            "type": format!("{LINK_BASE}/diskTypes/pd-ssd")
        }))
    );
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
    let (_emulator, service) = service().await;

    let err = service
        .delete_disk("locked")
        .await
        .expect_err("delete rejected");

    let GceError::Api {
        ref method,
        ref url,
        status,
        ref body,
    } = err
    else {
        panic!("expected Api error, got {err:?}");
    };
    assert_eq!(method, "DELETE");
    assert!(url.ends_with("/zones/zone-a/disks/locked"), "url: {url}");
    assert_eq!(status, 500);
    assert_eq!(body, "disk is locked");
}

#[tokio::test]
async fn driver_uses_the_device_name_reported_by_the_instance() {
    let (_emulator, service) = service().await;
    let identity = service.identity().clone();
    let fs = MemoryFilesystem::new();
    fs.seed_mount("/dev/disk/by-id/google-data-dev", "/mnt/data");
    let driver = VolumeDriver::new(service, fs, identity, "/mnt");

    let volume = driver.get("data").await.expect("volume observed");

    assert!(volume.ready);
    assert_eq!(volume.path, Some(Utf8PathBuf::from("/mnt/data")));
}

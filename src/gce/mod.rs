//! Compute Engine implementation of [`DiskService`].
//!
//! Calls go to the zonal Compute Engine v1 REST API with bearer tokens
//! obtained from the instance metadata server. Listings follow
//! `nextPageToken` until exhausted; a 404 on a disk lookup means the disk
//! does not exist.

mod metadata;
mod types;

use std::env;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

use crate::disk::{
    AttachRequest, Disk, DiskFuture, DiskService, DiskSpec, DiskType, InstanceInfo, Operation,
};
use crate::identity::InstanceIdentity;

pub use metadata::{IdentityOverrides, METADATA_BASE, MetadataClient};
use types::{
    AttachDiskBody, DiskResource, DiskTypeResource, InsertDiskBody, InstanceResource,
    OperationResource, Page,
};

/// Default Compute Engine API endpoint.
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Environment variable naming a service-account key file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Errors raised by the Compute Engine adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GceError {
    /// Raised when the metadata server cannot supply a value.
    #[error("metadata server request for {path} failed: {message}")]
    Metadata {
        /// Metadata path requested.
        path: String,
        /// Transport or status failure.
        message: String,
    },
    /// Raised when a request cannot be sent or its body cannot be read.
    #[error("{method} {url} failed: {message}")]
    Transport {
        /// HTTP method.
        method: String,
        /// Request URL.
        url: String,
        /// Transport error.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Api {
        /// HTTP method.
        method: String,
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Raised when a response body does not match the expected shape.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// Request URL.
        url: String,
        /// Decoder error.
        message: String,
    },
}

/// Disk service backed by the Compute Engine REST API.
#[derive(Debug)]
pub struct GceDiskService {
    identity: InstanceIdentity,
    metadata: MetadataClient,
    zone_base: String,
}

impl GceDiskService {
    /// Creates a service for `identity`, authenticating through `metadata`
    /// and calling the API rooted at `compute_base`.
    #[must_use]
    pub fn new(identity: InstanceIdentity, metadata: MetadataClient, compute_base: &str) -> Self {
        let zone_base = format!(
            "{}/projects/{}/zones/{}",
            compute_base.trim_end_matches('/'),
            identity.project(),
            identity.zone()
        );
        Self {
            identity,
            metadata,
            zone_base,
        }
    }

    /// Discovers the local identity from the metadata server, honouring
    /// `overrides`, and connects to the public API.
    ///
    /// # Errors
    ///
    /// Returns [`GceError::Metadata`] when the identity cannot be read.
    pub async fn connect(overrides: &IdentityOverrides) -> Result<Self, GceError> {
        Self::connect_with(overrides, METADATA_BASE, COMPUTE_API_BASE).await
    }

    /// Like [`GceDiskService::connect`] with explicit endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`GceError::Metadata`] when the identity cannot be read.
    pub async fn connect_with(
        overrides: &IdentityOverrides,
        metadata_base: &str,
        compute_base: &str,
    ) -> Result<Self, GceError> {
        if env::var_os(CREDENTIALS_ENV).is_some() {
            warn!(
                variable = CREDENTIALS_ENV,
                "service-account key files are not used; tokens come from the metadata server"
            );
        }
        let metadata = MetadataClient::new(metadata_base);
        let identity = metadata.identity(overrides).await?;
        info!(
            project = %identity.project(),
            zone = %identity.zone(),
            instance = %identity.instance(),
            "detected instance identity"
        );
        Ok(Self::new(identity, metadata, compute_base))
    }

    /// Identity of the local instance.
    #[must_use]
    pub const fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.zone_base)
    }

    /// Sends an authorised request; `Ok(None)` means HTTP 404.
    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Option<String>, GceError> {
        let token = self.metadata.access_token().await?;
        let transport = |err: reqwest::Error| GceError::Transport {
            method: method.to_string(),
            url: url.to_owned(),
            message: err.to_string(),
        };
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GceError::Api {
                method: method.to_string(),
                url: url.to_owned(),
                status: status.as_u16(),
                body,
            });
        }
        response.text().await.map(Some).map_err(transport)
    }

    async fn optional<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Option<T>, GceError> {
        let Some(body) = self.dispatch(method, url, request).await? else {
            return Ok(None);
        };
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|err| GceError::Decode {
                url: url.to_owned(),
                message: err.to_string(),
            })
    }

    async fn required<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, GceError> {
        let method_name = method.to_string();
        self.optional(method, url, request)
            .await?
            .ok_or_else(|| GceError::Api {
                method: method_name,
                url: url.to_owned(),
                status: StatusCode::NOT_FOUND.as_u16(),
                body: String::from("resource not found"),
            })
    }

    async fn list_all<T: DeserializeOwned + Send>(&self, url: &str) -> Result<Vec<T>, GceError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = HTTP_CLIENT.get(url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: Page<T> = self.required(Method::GET, url, request).await?;
            items.extend(page.items.unwrap_or_default());
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }
    }

    async fn operation(&self, url: &str, request: RequestBuilder) -> Result<Operation, GceError> {
        let resource: OperationResource = self.required(Method::POST, url, request).await?;
        Ok(Operation::from(resource))
    }
}

impl DiskService for GceDiskService {
    type Error = GceError;

    fn list_disks(&self) -> DiskFuture<'_, Vec<Disk>, Self::Error> {
        Box::pin(async move {
            let url = self.url("disks");
            let disks: Vec<DiskResource> = self.list_all(&url).await?;
            Ok(disks.into_iter().map(Disk::from).collect())
        })
    }

    fn get_disk<'a>(&'a self, name: &'a str) -> DiskFuture<'a, Option<Disk>, Self::Error> {
        Box::pin(async move {
            let url = self.url(&format!("disks/{name}"));
            let disk: Option<DiskResource> = self
                .optional(Method::GET, &url, HTTP_CLIENT.get(&url))
                .await?;
            Ok(disk.map(Disk::from))
        })
    }

    fn get_instance<'a>(&'a self, name: &'a str) -> DiskFuture<'a, InstanceInfo, Self::Error> {
        Box::pin(async move {
            let url = self.url(&format!("instances/{name}"));
            let instance: InstanceResource = self
                .required(Method::GET, &url, HTTP_CLIENT.get(&url))
                .await?;
            Ok(InstanceInfo::from(instance))
        })
    }

    fn attach_disk<'a>(
        &'a self,
        instance: &'a str,
        request: &'a AttachRequest,
    ) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = self.url(&format!("instances/{instance}/attachDisk"));
            let body = AttachDiskBody {
                device_name: &request.device_name,
                source: &request.source,
            };
            self.operation(&url, HTTP_CLIENT.post(&url).json(&body))
                .await
        })
    }

    fn detach_disk<'a>(
        &'a self,
        instance: &'a str,
        device_name: &'a str,
    ) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = self.url(&format!("instances/{instance}/detachDisk"));
            let request = HTTP_CLIENT
                .post(&url)
                .query(&[("deviceName", device_name)]);
            self.operation(&url, request).await
        })
    }

    fn create_disk<'a>(&'a self, spec: &'a DiskSpec) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = self.url("disks");
            let body = InsertDiskBody {
                name: &spec.name,
                size_gb: spec.size_gb.to_string(),
                disk_type: spec.disk_type.as_deref(),
            };
            self.operation(&url, HTTP_CLIENT.post(&url).json(&body))
                .await
        })
    }

    fn delete_disk<'a>(&'a self, name: &'a str) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = self.url(&format!("disks/{name}"));
            let resource: OperationResource = self
                .required(Method::DELETE, &url, HTTP_CLIENT.delete(&url))
                .await?;
            Ok(Operation::from(resource))
        })
    }

    fn list_disk_types(&self) -> DiskFuture<'_, Vec<DiskType>, Self::Error> {
        Box::pin(async move {
            let url = self.url("diskTypes");
            let types: Vec<DiskTypeResource> = self.list_all(&url).await?;
            Ok(types.into_iter().map(DiskType::from).collect())
        })
    }

    fn get_operation<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = self.url(&format!("operations/{}", operation.name));
            let resource: OperationResource = self
                .required(Method::GET, &url, HTTP_CLIENT.get(&url))
                .await?;
            Ok(Operation::from(resource))
        })
    }
}

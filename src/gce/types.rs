//! Compute Engine REST payloads.

use serde::{Deserialize, Serialize};

use crate::disk::{AttachedDisk, Disk, DiskType, InstanceInfo, Operation, OperationStatus};

/// One page of a paginated listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Page<T> {
    pub(super) items: Option<Vec<T>>,
    pub(super) next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DiskResource {
    name: String,
    self_link: String,
    size_gb: Option<String>,
    users: Option<Vec<String>>,
    #[serde(rename = "type")]
    disk_type: Option<String>,
}

impl From<DiskResource> for Disk {
    fn from(resource: DiskResource) -> Self {
        Self {
            name: resource.name,
            self_link: resource.self_link,
            size_gb: resource
                .size_gb
                .and_then(|size| size.parse().ok())
                .unwrap_or_default(),
            users: resource.users.unwrap_or_default(),
            disk_type: resource.disk_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AttachedDiskResource {
    device_name: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceResource {
    name: String,
    self_link: String,
    disks: Option<Vec<AttachedDiskResource>>,
}

impl From<InstanceResource> for InstanceInfo {
    fn from(resource: InstanceResource) -> Self {
        Self {
            name: resource.name,
            self_link: resource.self_link,
            disks: resource
                .disks
                .unwrap_or_default()
                .into_iter()
                .map(|disk| AttachedDisk {
                    device_name: disk.device_name.unwrap_or_default(),
                    source: disk.source.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DiskTypeResource {
    name: String,
    self_link: String,
}

impl From<DiskTypeResource> for DiskType {
    fn from(resource: DiskTypeResource) -> Self {
        Self {
            name: resource.name,
            self_link: resource.self_link,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct OperationErrorItem {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OperationErrorResource {
    errors: Option<Vec<OperationErrorItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OperationResource {
    name: String,
    target_link: Option<String>,
    status: String,
    error: Option<OperationErrorResource>,
}

impl From<OperationResource> for Operation {
    fn from(resource: OperationResource) -> Self {
        let error = resource.error.map(|error| {
            let rendered: Vec<String> = error
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|item| {
                    let code = item.code.unwrap_or_default();
                    let message = item.message.unwrap_or_default();
                    format!("{code}: {message}")
                })
                .collect();
            if rendered.is_empty() {
                String::from("operation reported an error")
            } else {
                rendered.join("; ")
            }
        });
        Self {
            name: resource.name,
            target_link: resource.target_link.unwrap_or_default(),
            status: OperationStatus::from(resource.status.as_str()),
            error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AttachDiskBody<'a> {
    pub(super) device_name: &'a str,
    pub(super) source: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InsertDiskBody<'a> {
    pub(super) name: &'a str,
    pub(super) size_gb: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(super) disk_type: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub(super) access_token: String,
    pub(super) expires_in: u64,
}

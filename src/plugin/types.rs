//! Docker volume plugin protocol messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::volume::Volume;

/// Body of every `/VolumeDriver.*` request. Fields a given endpoint does not
/// use are simply absent.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRequest {
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Create options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<BTreeMap<String, String>>,
    /// Caller identifier sent with mount and unmount requests.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Volume description returned by `Get`, `List` and `Create`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Mount point, omitted while unmounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    /// Extra state reported by `Get`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BTreeMap<String, serde_json::Value>>,
}

impl VolumeInfo {
    /// Name and mount point only.
    #[must_use]
    pub fn summary(volume: &Volume) -> Self {
        Self {
            name: volume.name.clone(),
            mountpoint: volume.path.as_ref().map(ToString::to_string),
            status: None,
        }
    }

    /// Name, mount point and attachment status.
    #[must_use]
    pub fn detailed(volume: &Volume) -> Self {
        let status = BTreeMap::from([(
            String::from("ready"),
            serde_json::Value::Bool(volume.ready),
        )]);
        Self {
            status: Some(status),
            ..Self::summary(volume)
        }
    }
}

/// Scope advertised by `/VolumeDriver.Capabilities`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    /// `global` when volumes are visible cluster wide.
    pub scope: String,
}

/// Response to `/Plugin.Activate`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Plugin subsystems implemented.
    pub implements: Vec<String>,
}

/// Response to every `/VolumeDriver.*` request.
///
/// A non-empty `err` marks a failed request; the remaining fields are then
/// absent.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResponse {
    /// Error message, empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
    /// Mount point returned by `Mount` and `Path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    /// Volume returned by `Get` and `Create`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    /// Volumes returned by `List`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,
    /// Capabilities returned by `Capabilities`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl PluginResponse {
    /// Failed response carrying `message`.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
            ..Self::default()
        }
    }
}

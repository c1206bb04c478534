//! Compute Engine metadata server client.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::types::TokenResponse;
use super::{GceError, HTTP_CLIENT};
use crate::identity::InstanceIdentity;

/// Default metadata server endpoint.
pub const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";
const TOKEN_PATH: &str = "instance/service-accounts/default/token";
const PROJECT_PATH: &str = "project/project-id";
const ZONE_PATH: &str = "instance/zone";
const INSTANCE_PATH: &str = "instance/name";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Identity components supplied by configuration instead of the metadata
/// server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IdentityOverrides {
    /// Project identifier.
    pub project: Option<String>,
    /// Zone name.
    pub zone: Option<String>,
    /// Instance name.
    pub instance: Option<String>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Reads identity and access tokens from the metadata server.
#[derive(Debug)]
pub struct MetadataClient {
    base: String,
    token: Mutex<Option<CachedToken>>,
}

impl MetadataClient {
    /// Creates a client for the metadata server at `base`.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_owned(),
            token: Mutex::new(None),
        }
    }

    /// Fetches a metadata value as text.
    ///
    /// # Errors
    ///
    /// Returns [`GceError::Metadata`] when the server cannot be reached or
    /// answers with a non-success status.
    pub async fn get_text(&self, path: &str) -> Result<String, GceError> {
        let url = format!("{}/{path}", self.base);
        let failure = |message: String| GceError::Metadata {
            path: path.to_owned(),
            message,
        };
        let response = HTTP_CLIENT
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .send()
            .await
            .map_err(|err| failure(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("HTTP {}", status.as_u16())));
        }
        response.text().await.map_err(|err| failure(err.to_string()))
    }

    /// Returns a bearer token for the default service account, reusing the
    /// cached one until shortly before it expires.
    ///
    /// # Errors
    ///
    /// Returns an error when the token cannot be fetched or decoded.
    pub async fn access_token(&self) -> Result<String, GceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached
            .as_ref()
            .filter(|token| Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at)
        {
            return Ok(token.value.clone());
        }

        debug!("refreshing access token");
        let body = self.get_text(TOKEN_PATH).await?;
        let response: TokenResponse =
            serde_json::from_str(&body).map_err(|err| GceError::Decode {
                url: format!("{}/{TOKEN_PATH}", self.base),
                message: err.to_string(),
            })?;
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(response.access_token)
    }

    /// Resolves the local instance identity, querying the metadata server
    /// only for components not supplied in `overrides`.
    ///
    /// # Errors
    ///
    /// Returns [`GceError::Metadata`] when a required value cannot be read.
    pub async fn identity(
        &self,
        overrides: &IdentityOverrides,
    ) -> Result<InstanceIdentity, GceError> {
        let project = match &overrides.project {
            Some(project) => project.clone(),
            None => self.get_text(PROJECT_PATH).await?,
        };
        let zone = match &overrides.zone {
            Some(zone) => zone.clone(),
            None => last_segment(&self.get_text(ZONE_PATH).await?),
        };
        let instance = match &overrides.instance {
            Some(instance) => instance.clone(),
            None => self.get_text(INSTANCE_PATH).await?,
        };
        Ok(InstanceIdentity::new(project, zone, instance))
    }
}

/// The metadata server reports the zone as `projects/<n>/zones/<zone>`.
fn last_segment(value: &str) -> String {
    value
        .trim()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_owned()
}

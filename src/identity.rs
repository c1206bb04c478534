//! Identity of the local compute instance.

/// Project, zone and instance name captured once at start-up.
///
/// The identity anchors every attachment decision: a disk is considered
/// attached when the instance URI appears among the disk's users.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceIdentity {
    project: String,
    zone: String,
    instance: String,
    uri: String,
}

impl InstanceIdentity {
    /// Builds an identity, trimming each component.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        let project_id = project.into().trim().to_owned();
        let zone_name = zone.into().trim().to_owned();
        let instance_name = instance.into().trim().to_owned();
        let uri = format!("projects/{project_id}/zones/{zone_name}/instances/{instance_name}");
        Self {
            project: project_id,
            zone: zone_name,
            instance: instance_name,
            uri,
        }
    }

    /// Project identifier.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Zone name.
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Instance name.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Canonical relative URI, `projects/<p>/zones/<z>/instances/<i>`.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns `true` when `users` contains this instance.
    ///
    /// Providers report users either as the relative URI or as a full URL
    /// ending in it; both forms match.
    #[must_use]
    pub fn is_attached<S: AsRef<str>>(&self, users: &[S]) -> bool {
        users.iter().any(|candidate| {
            let user = candidate.as_ref();
            user == self.uri
                || user
                    .strip_suffix(self.uri.as_str())
                    .is_some_and(|prefix| prefix.ends_with('/'))
        })
    }
}

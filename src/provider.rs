//! Provider abstraction over the cloud APIs used by the backup batch.
//!
//! The orchestrators and the retention sweeper only speak to this trait, so
//! tests can substitute a scripted fake and the OpenStack implementation
//! stays a thin transport layer.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

/// A block-storage volume as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider specific volume identifier.
    pub id: String,
    /// Lifecycle status (for example `available`).
    pub status: String,
    /// Creation time reported by the provider.
    pub created_at: DateTime<Utc>,
}

/// A point-in-time snapshot of a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSnapshot {
    /// Provider specific snapshot identifier.
    pub id: String,
    /// Identifier of the parent volume.
    pub volume_id: String,
    /// Snapshot name; generated snapshots carry the configured prefix.
    pub name: String,
    /// Lifecycle status (for example `creating` or `available`).
    pub status: String,
    /// Creation time reported by the provider.
    pub created_at: DateTime<Utc>,
}

/// A compute instance as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Server {
    /// Provider specific server identifier.
    pub id: String,
    /// Human readable server name.
    pub name: String,
    /// Lifecycle status (for example `ACTIVE`).
    pub status: String,
}

/// An image created from a server; functions as the server's snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerImage {
    /// Provider specific image identifier.
    pub id: String,
    /// Image name; generated images carry the configured prefix.
    pub name: String,
    /// Lifecycle status (for example `queued` or `active`).
    pub status: String,
    /// Creation time reported by the provider.
    pub created_at: DateTime<Utc>,
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface implemented by cloud providers.
///
/// List operations are scoped to all tenants and filtered by the given
/// lifecycle status. Implementations are expected to be safe for concurrent
/// calls through a shared reference.
pub trait CloudProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists all volumes with the given status.
    fn list_volumes<'a>(&'a self, status: &'a str) -> ProviderFuture<'a, Vec<Volume>, Self::Error>;

    /// Requests a new snapshot of `volume_id` with the given name.
    ///
    /// The request is forced so in-use volumes can still be snapshotted.
    fn create_volume_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, VolumeSnapshot, Self::Error>;

    /// Fetches the current state of a volume snapshot.
    fn get_volume_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, VolumeSnapshot, Self::Error>;

    /// Lists all volume snapshots with the given status.
    fn list_volume_snapshots<'a>(
        &'a self,
        status: &'a str,
    ) -> ProviderFuture<'a, Vec<VolumeSnapshot>, Self::Error>;

    /// Deletes a volume snapshot.
    fn delete_volume_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Lists all servers with the given status.
    fn list_servers<'a>(&'a self, status: &'a str) -> ProviderFuture<'a, Vec<Server>, Self::Error>;

    /// Requests a new image of `server_id` and returns the image identifier.
    fn create_server_image<'a>(
        &'a self,
        server_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Fetches the current state of a server image.
    fn get_image<'a>(&'a self, image_id: &'a str)
    -> ProviderFuture<'a, ServerImage, Self::Error>;

    /// Lists all images with the given status.
    fn list_images<'a>(
        &'a self,
        status: &'a str,
    ) -> ProviderFuture<'a, Vec<ServerImage>, Self::Error>;

    /// Deletes a server image.
    fn delete_image<'a>(&'a self, image_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}

/// Builds the name for a generated snapshot or image.
///
/// The configured prefix is what the retention sweeper later recognises, so
/// every name produced here is eligible for the age-based purge.
#[must_use]
pub fn snapshot_name(
    prefix: &str,
    resource_key: &str,
    taken_at: DateTime<Utc>,
    timestamp_format: &str,
) -> String {
    format!(
        "{prefix}{resource_key}_{}",
        taken_at.format(timestamp_format)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_name_joins_prefix_key_and_timestamp() {
        let taken_at = Utc
            .with_ymd_and_hms(2023, 1, 1, 12, 30, 0)
            .single()
            .expect("valid timestamp");

        let name = snapshot_name("snapshot_", "vol-1234", taken_at, "%Y%m%d%H%M%S");

        assert_eq!(name, "snapshot_vol-1234_20230101123000");
    }

    #[test]
    fn snapshot_name_keeps_resource_key_visible() {
        let taken_at = Utc
            .with_ymd_and_hms(2023, 6, 15, 0, 0, 0)
            .single()
            .expect("valid timestamp");

        let name = snapshot_name("snapshot_", "web-frontend", taken_at, "%Y%m%d");

        assert!(name.starts_with("snapshot_"));
        assert!(name.contains("web-frontend"));
    }
}

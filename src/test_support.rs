//! Test support utilities shared across unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::BackupPolicy;
use crate::provider::{
    CloudProvider, ProviderFuture, Server, ServerImage, Volume, VolumeSnapshot,
};

/// Error returned by the scripted provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct FakeProviderError(pub String);

/// Records a single call made through [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FakeCall {
    /// `list_volumes` with the given status filter.
    ListVolumes {
        /// Requested status filter.
        status: String,
    },
    /// `create_volume_snapshot` for a volume.
    CreateVolumeSnapshot {
        /// Parent volume identifier.
        volume_id: String,
        /// Requested snapshot name.
        name: String,
    },
    /// `get_volume_snapshot` status read.
    GetVolumeSnapshot {
        /// Snapshot identifier.
        snapshot_id: String,
    },
    /// `list_volume_snapshots` with the given status filter.
    ListVolumeSnapshots {
        /// Requested status filter.
        status: String,
    },
    /// `delete_volume_snapshot` for a snapshot.
    DeleteVolumeSnapshot {
        /// Snapshot identifier.
        snapshot_id: String,
    },
    /// `list_servers` with the given status filter.
    ListServers {
        /// Requested status filter.
        status: String,
    },
    /// `create_server_image` for a server.
    CreateServerImage {
        /// Source server identifier.
        server_id: String,
        /// Requested image name.
        name: String,
    },
    /// `get_image` status read.
    GetImage {
        /// Image identifier.
        image_id: String,
    },
    /// `list_images` with the given status filter.
    ListImages {
        /// Requested status filter.
        status: String,
    },
    /// `delete_image` for an image.
    DeleteImage {
        /// Image identifier.
        image_id: String,
    },
}

#[derive(Debug, Default)]
struct FakeState {
    volumes: Vec<Volume>,
    servers: Vec<Server>,
    volume_snapshots: Vec<VolumeSnapshot>,
    images: Vec<ServerImage>,
    scripted_snapshot_statuses: HashMap<String, VecDeque<String>>,
    held_snapshot_statuses: HashMap<String, String>,
    scripted_image_statuses: HashMap<String, VecDeque<String>>,
    held_image_statuses: HashMap<String, String>,
    failing_volume_creates: HashSet<String>,
    failing_server_creates: HashSet<String>,
    failing_deletes: HashSet<String>,
    fail_list_volumes: bool,
    fail_list_servers: bool,
    fail_list_volume_snapshots: bool,
    fail_list_images: bool,
    calls: Vec<FakeCall>,
}

/// Scripted provider double driving deterministic outcomes without network
/// calls.
///
/// Created snapshots are assigned the id `snap-<volume-id>` and created
/// images `image-of-<server-id>`, so status scripts can be seeded up front.
/// Unscripted status reads report the usable status immediately.
#[derive(Debug, Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a volume returned by `list_volumes`.
    pub fn push_volume(&self, id: &str, status: &str) {
        lock(&self.state).volumes.push(Volume {
            id: id.to_owned(),
            status: status.to_owned(),
            created_at: Utc::now(),
        });
    }

    /// Seeds a server returned by `list_servers`.
    pub fn push_server(&self, id: &str, name: &str, status: &str) {
        lock(&self.state).servers.push(Server {
            id: id.to_owned(),
            name: name.to_owned(),
            status: status.to_owned(),
        });
    }

    /// Seeds an existing volume snapshot returned by `list_volume_snapshots`.
    pub fn push_existing_volume_snapshot(
        &self,
        id: &str,
        name: &str,
        created_at: DateTime<Utc>,
    ) {
        lock(&self.state).volume_snapshots.push(VolumeSnapshot {
            id: id.to_owned(),
            volume_id: String::from("vol-parent"),
            name: name.to_owned(),
            status: String::from("available"),
            created_at,
        });
    }

    /// Seeds an existing image returned by `list_images`.
    pub fn push_existing_image(&self, id: &str, name: &str, created_at: DateTime<Utc>) {
        lock(&self.state).images.push(ServerImage {
            id: id.to_owned(),
            name: name.to_owned(),
            status: String::from("active"),
            created_at,
        });
    }

    /// Queues statuses returned by successive `get_volume_snapshot` calls.
    pub fn script_snapshot_statuses(&self, snapshot_id: &str, statuses: &[&str]) {
        lock(&self.state).scripted_snapshot_statuses.insert(
            snapshot_id.to_owned(),
            statuses.iter().map(|status| (*status).to_owned()).collect(),
        );
    }

    /// Pins the status returned by every `get_volume_snapshot` call.
    pub fn hold_snapshot_status(&self, snapshot_id: &str, status: &str) {
        lock(&self.state)
            .held_snapshot_statuses
            .insert(snapshot_id.to_owned(), status.to_owned());
    }

    /// Queues statuses returned by successive `get_image` calls.
    pub fn script_image_statuses(&self, image_id: &str, statuses: &[&str]) {
        lock(&self.state).scripted_image_statuses.insert(
            image_id.to_owned(),
            statuses.iter().map(|status| (*status).to_owned()).collect(),
        );
    }

    /// Pins the status returned by every `get_image` call.
    pub fn hold_image_status(&self, image_id: &str, status: &str) {
        lock(&self.state)
            .held_image_statuses
            .insert(image_id.to_owned(), status.to_owned());
    }

    /// Makes `create_volume_snapshot` fail for the given volume.
    pub fn fail_create_for_volume(&self, volume_id: &str) {
        lock(&self.state)
            .failing_volume_creates
            .insert(volume_id.to_owned());
    }

    /// Makes `create_server_image` fail for the given server.
    pub fn fail_create_for_server(&self, server_id: &str) {
        lock(&self.state)
            .failing_server_creates
            .insert(server_id.to_owned());
    }

    /// Makes deletes of the given snapshot or image fail.
    pub fn fail_delete(&self, resource_id: &str) {
        lock(&self.state)
            .failing_deletes
            .insert(resource_id.to_owned());
    }

    /// Makes the next `list_volumes` call fail.
    pub fn fail_list_volumes(&self) {
        lock(&self.state).fail_list_volumes = true;
    }

    /// Makes the next `list_servers` call fail.
    pub fn fail_list_servers(&self) {
        lock(&self.state).fail_list_servers = true;
    }

    /// Makes the next `list_volume_snapshots` call fail.
    pub fn fail_list_volume_snapshots(&self) {
        lock(&self.state).fail_list_volume_snapshots = true;
    }

    /// Makes the next `list_images` call fail.
    pub fn fail_list_images(&self) {
        lock(&self.state).fail_list_images = true;
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        lock(&self.state).calls.clone()
    }

    /// Returns the names passed to `create_volume_snapshot`, in call order.
    #[must_use]
    pub fn created_snapshot_names(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                FakeCall::CreateVolumeSnapshot { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the names passed to `create_server_image`, in call order.
    #[must_use]
    pub fn created_image_names(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                FakeCall::CreateServerImage { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns identifiers passed to either delete operation, in call order.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                FakeCall::DeleteVolumeSnapshot { snapshot_id } => Some(snapshot_id.clone()),
                FakeCall::DeleteImage { image_id } => Some(image_id.clone()),
                _ => None,
            })
            .collect()
    }
}

fn next_status(
    scripted: &mut HashMap<String, VecDeque<String>>,
    held: &HashMap<String, String>,
    id: &str,
    fallback: &str,
) -> String {
    if let Some(queue) = scripted.get_mut(id)
        && let Some(status) = queue.pop_front()
    {
        return status;
    }
    held.get(id)
        .cloned()
        .unwrap_or_else(|| fallback.to_owned())
}

impl CloudProvider for FakeProvider {
    type Error = FakeProviderError;

    fn list_volumes<'a>(&'a self, status: &'a str) -> ProviderFuture<'a, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::ListVolumes {
                status: status.to_owned(),
            });
            if state.fail_list_volumes {
                return Err(FakeProviderError(String::from("list volumes failed")));
            }
            Ok(state.volumes.clone())
        })
    }

    fn create_volume_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, VolumeSnapshot, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::CreateVolumeSnapshot {
                volume_id: volume_id.to_owned(),
                name: name.to_owned(),
            });
            if state.failing_volume_creates.contains(volume_id) {
                return Err(FakeProviderError(format!(
                    "create snapshot of {volume_id} failed"
                )));
            }
            Ok(VolumeSnapshot {
                id: format!("snap-{volume_id}"),
                volume_id: volume_id.to_owned(),
                name: name.to_owned(),
                status: String::from("creating"),
                created_at: Utc::now(),
            })
        })
    }

    fn get_volume_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, VolumeSnapshot, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::GetVolumeSnapshot {
                snapshot_id: snapshot_id.to_owned(),
            });
            let FakeState {
                scripted_snapshot_statuses,
                held_snapshot_statuses,
                ..
            } = &mut *state;
            let status = next_status(
                scripted_snapshot_statuses,
                held_snapshot_statuses,
                snapshot_id,
                "available",
            );
            Ok(VolumeSnapshot {
                id: snapshot_id.to_owned(),
                volume_id: String::from("vol-parent"),
                name: String::new(),
                status,
                created_at: Utc::now(),
            })
        })
    }

    fn list_volume_snapshots<'a>(
        &'a self,
        status: &'a str,
    ) -> ProviderFuture<'a, Vec<VolumeSnapshot>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::ListVolumeSnapshots {
                status: status.to_owned(),
            });
            if state.fail_list_volume_snapshots {
                return Err(FakeProviderError(String::from(
                    "list volume snapshots failed",
                )));
            }
            Ok(state.volume_snapshots.clone())
        })
    }

    fn delete_volume_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::DeleteVolumeSnapshot {
                snapshot_id: snapshot_id.to_owned(),
            });
            if state.failing_deletes.contains(snapshot_id) {
                return Err(FakeProviderError(format!("delete {snapshot_id} failed")));
            }
            Ok(())
        })
    }

    fn list_servers<'a>(&'a self, status: &'a str) -> ProviderFuture<'a, Vec<Server>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::ListServers {
                status: status.to_owned(),
            });
            if state.fail_list_servers {
                return Err(FakeProviderError(String::from("list servers failed")));
            }
            Ok(state.servers.clone())
        })
    }

    fn create_server_image<'a>(
        &'a self,
        server_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::CreateServerImage {
                server_id: server_id.to_owned(),
                name: name.to_owned(),
            });
            if state.failing_server_creates.contains(server_id) {
                return Err(FakeProviderError(format!(
                    "create image of {server_id} failed"
                )));
            }
            Ok(format!("image-of-{server_id}"))
        })
    }

    fn get_image<'a>(
        &'a self,
        image_id: &'a str,
    ) -> ProviderFuture<'a, ServerImage, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::GetImage {
                image_id: image_id.to_owned(),
            });
            let FakeState {
                scripted_image_statuses,
                held_image_statuses,
                ..
            } = &mut *state;
            let status = next_status(
                scripted_image_statuses,
                held_image_statuses,
                image_id,
                "active",
            );
            Ok(ServerImage {
                id: image_id.to_owned(),
                name: String::new(),
                status,
                created_at: Utc::now(),
            })
        })
    }

    fn list_images<'a>(
        &'a self,
        status: &'a str,
    ) -> ProviderFuture<'a, Vec<ServerImage>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::ListImages {
                status: status.to_owned(),
            });
            if state.fail_list_images {
                return Err(FakeProviderError(String::from("list images failed")));
            }
            Ok(state.images.clone())
        })
    }

    fn delete_image<'a>(&'a self, image_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(FakeCall::DeleteImage {
                image_id: image_id.to_owned(),
            });
            if state.failing_deletes.contains(image_id) {
                return Err(FakeProviderError(format!("delete {image_id} failed")));
            }
            Ok(())
        })
    }
}

/// Returns a policy with short waits, suitable for driving polls in tests.
#[must_use]
pub fn fast_policy() -> BackupPolicy {
    BackupPolicy {
        volume_status: String::from("available"),
        server_status: String::from("ACTIVE"),
        snapshot_prefix: String::from("snapshot_"),
        timestamp_format: String::from("%Y%m%d%H%M%S"),
        poll_interval: Duration::from_millis(1),
        poll_attempts: 5,
        snapshot_wait: Duration::from_millis(20),
        retention_hours: 336,
        concurrency: 4,
    }
}

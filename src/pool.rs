// ABOUTME: Per-room container pool, reference-counted across the sessions attached to each room
//
// One container per room. Creation and teardown for a room are serialized by
// that room's slot lock, so two users opening the same empty room at once get
// one container with a count of two. Unrelated rooms never wait on each other.

use crate::config::ContainerSettings;
use crate::runtime::{ContainerError, ContainerRuntime, RoomContainerSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Bookkeeping for one live room container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomContainer {
    pub container_id: String,
    pub host_path: PathBuf,
    pub ref_count: usize,
}

#[derive(Debug, Default)]
struct SlotState {
    container: Option<RoomContainer>,
    /// Set once the slot has been evicted from the map; holders must retry
    /// with a fresh slot
    retired: bool,
    /// Bumped on every acquire and every zero-crossing so a delayed teardown
    /// can tell whether the room was rejoined in the meantime
    teardown_epoch: u64,
}

#[derive(Debug, Default)]
struct RoomSlot {
    state: Mutex<SlotState>,
}

struct PoolInner {
    runtime: Arc<dyn ContainerRuntime>,
    settings: ContainerSettings,
    rooms: StdMutex<HashMap<String, Arc<RoomSlot>>>,
}

/// Owns the room containers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ContainerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ContainerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerPool")
            .field("settings", &self.inner.settings)
            .field("rooms", &self.rooms())
            .finish()
    }
}

impl ContainerPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: ContainerSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                runtime,
                settings,
                rooms: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.inner.runtime
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.inner.settings
    }

    /// Get the room's container, creating it if absent, and take one
    /// reference on it. Returns the container id.
    pub async fn acquire(&self, room_id: &str, host_path: &Path) -> Result<String, ContainerError> {
        loop {
            let slot = self.inner.slot(room_id);
            let mut guard = slot.state.lock().await;
            let state = &mut *guard;

            if state.retired {
                continue;
            }

            if let Some(record) = state.container.as_mut() {
                record.ref_count += 1;
                state.teardown_epoch += 1;
                info!(
                    room = %room_id,
                    refs = record.ref_count,
                    "Attached to existing room container"
                );
                return Ok(record.container_id.clone());
            }

            match self.inner.create_room_container(room_id, host_path).await {
                Ok(container_id) => {
                    info!(room = %room_id, container = %container_id, refs = 1, "Room container ready");
                    state.container = Some(RoomContainer {
                        container_id: container_id.clone(),
                        host_path: host_path.to_path_buf(),
                        ref_count: 1,
                    });
                    return Ok(container_id);
                }
                Err(e) => {
                    error!(room = %room_id, error = %e, "Failed to create room container");
                    state.retired = true;
                    self.inner.evict(room_id, &slot);
                    return Err(e);
                }
            }
        }
    }

    /// Drop one reference on the room's container. The container is torn
    /// down when the count reaches zero.
    pub async fn release(&self, room_id: &str) {
        let Some(slot) = self.inner.existing_slot(room_id) else {
            warn!(room = %room_id, "Release for room without a container");
            return;
        };

        let mut guard = slot.state.lock().await;
        let state = &mut *guard;

        let Some(record) = state.container.as_mut() else {
            warn!(room = %room_id, "Release for room without a container");
            return;
        };

        record.ref_count = record.ref_count.saturating_sub(1);
        info!(room = %room_id, refs = record.ref_count, "Released room container");

        if record.ref_count > 0 {
            return;
        }

        let grace = self.inner.settings.release_grace();
        if grace.is_zero() {
            self.inner.teardown(room_id, &slot, state).await;
            return;
        }

        state.teardown_epoch += 1;
        let epoch = state.teardown_epoch;
        drop(guard);

        debug!(room = %room_id, ?grace, "Room idle, scheduling teardown");
        let inner = Arc::clone(&self.inner);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let mut guard = slot.state.lock().await;
            let state = &mut *guard;
            let still_idle = !state.retired
                && state.teardown_epoch == epoch
                && state.container.as_ref().is_some_and(|c| c.ref_count == 0);

            if still_idle {
                inner.teardown(&room_id, &slot, state).await;
            } else {
                debug!(room = %room_id, "Room rejoined during grace period, keeping container");
            }
        });
    }

    /// Current reference count for a room, if it has a container
    pub async fn ref_count(&self, room_id: &str) -> Option<usize> {
        let slot = self.inner.existing_slot(room_id)?;
        let state = slot.state.lock().await;
        state.container.as_ref().map(|c| c.ref_count)
    }

    /// Rooms with a pool entry
    pub fn rooms(&self) -> Vec<String> {
        self.inner.lock_rooms().keys().cloned().collect()
    }

    /// Force-remove every container following this system's naming
    /// convention and forget all pool entries. Best-effort; used at shutdown.
    pub async fn sweep_all(&self) {
        let slots: Vec<Arc<RoomSlot>> = self.inner.lock_rooms().drain().map(|(_, s)| s).collect();
        for slot in slots {
            let mut state = slot.state.lock().await;
            state.retired = true;
            state.container = None;
        }

        let prefix = &self.inner.settings.name_prefix;
        let containers = match self.inner.runtime.list_containers(prefix).await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "Error during container cleanup");
                return;
            }
        };

        info!(count = containers.len(), "Sweeping room containers");
        for container in containers {
            if let Err(e) = self
                .inner
                .runtime
                .stop_container(&container.id, self.inner.settings.stop_grace_secs)
                .await
            {
                debug!(container = %container.id, error = %e, "Stop failed during sweep");
            }
            if let Err(e) = self.inner.runtime.remove_container(&container.id).await {
                warn!(container = %container.id, error = %e, "Remove failed during sweep");
            }
        }
    }
}

impl PoolInner {
    fn lock_rooms(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<RoomSlot>>> {
        // A panic while holding this lock can't leave the map half-updated
        self.rooms.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn slot(&self, room_id: &str) -> Arc<RoomSlot> {
        Arc::clone(self.lock_rooms().entry(room_id.to_string()).or_default())
    }

    fn existing_slot(&self, room_id: &str) -> Option<Arc<RoomSlot>> {
        self.lock_rooms().get(room_id).cloned()
    }

    fn evict(&self, room_id: &str, slot: &Arc<RoomSlot>) {
        let mut rooms = self.lock_rooms();
        if rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            rooms.remove(room_id);
        }
    }

    async fn create_room_container(
        &self,
        room_id: &str,
        host_path: &Path,
    ) -> Result<String, ContainerError> {
        if !self.runtime.ping().await {
            return Err(ContainerError::Unavailable);
        }

        self.runtime.ensure_image(&self.settings.image).await?;

        // Recover from a previous crash that left a container under this name
        let name = self.settings.container_name(room_id);
        if let Err(e) = self.runtime.stop_container(&name, self.settings.stop_grace_secs).await {
            debug!(container = %name, error = %e, "No stale container to stop");
        }
        if let Err(e) = self.runtime.remove_container(&name).await {
            debug!(container = %name, error = %e, "No stale container to remove");
        }

        let spec = RoomContainerSpec::for_room(&self.settings, room_id, host_path.to_path_buf());
        let container_id = self.runtime.create_container(&spec).await?;

        if let Err(e) = self.runtime.start_container(&container_id).await {
            if let Err(remove_err) = self.runtime.remove_container(&container_id).await {
                warn!(container = %container_id, error = %remove_err, "Failed to remove unstarted container");
            }
            return Err(e);
        }

        Ok(container_id)
    }

    /// Stop and remove the room's container, then evict the slot. Removal
    /// failures are logged; the entry is evicted regardless.
    async fn teardown(&self, room_id: &str, slot: &Arc<RoomSlot>, state: &mut SlotState) {
        if let Some(record) = state.container.take() {
            info!(room = %room_id, container = %record.container_id, "No active sessions left, removing container");

            if let Err(e) = self
                .runtime
                .stop_container(&record.container_id, self.settings.stop_grace_secs)
                .await
            {
                warn!(container = %record.container_id, error = %e, "Failed to stop room container");
            }

            if let Err(e) = self.runtime.remove_container(&record.container_id).await {
                error!(
                    room = %room_id,
                    container = %record.container_id,
                    error = %e,
                    "Failed to remove room container; it may be orphaned in the runtime"
                );
            }
        }

        state.retired = true;
        self.evict(room_id, slot);
    }
}

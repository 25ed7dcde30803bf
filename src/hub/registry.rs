use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::instrument;

use super::{ConnectionId, Frame, TargetSelector};

/// Outbound half of one connection's bounded frame queue.
pub type ConnectionSender = mpsc::Sender<Frame>;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection registry has been shut down")]
    ShutDown,
}

/// One resolved delivery target, cloned out of the registry at resolution time.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: ConnectionId,
    pub sender: ConnectionSender,
}

#[derive(Debug)]
struct ConnectionEntry {
    sender: ConnectionSender,
    groups: HashSet<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    groups: HashMap<String, HashSet<ConnectionId>>,
    shut_down: bool,
}

impl RegistryState {
    fn remove_member(&mut self, group: &str, id: ConnectionId) {
        let now_empty = self.groups.get_mut(group).is_some_and(|members| {
            members.remove(&id);
            members.is_empty()
        });
        if now_empty {
            self.groups.remove(group);
        }
    }
}

/// Source of truth for which connections are reachable and which groups they belong to.
///
/// Every mutation takes the write lock, so readers always observe a connection
/// table and group index that agree with each other.
#[derive(Debug, Default)]
#[must_use]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip_all, err(Debug))]
    pub async fn register(&self, sender: ConnectionSender) -> Result<ConnectionId, RegistryError> {
        let mut state = self.state.write().await;
        if state.shut_down {
            return Err(RegistryError::ShutDown);
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = ConnectionEntry {
            sender,
            groups: HashSet::new(),
        };
        state.connections.insert(id, entry);

        tracing::debug!(%id, live = state.connections.len(), "Registered connection");
        Ok(id)
    }

    /// Removes the connection and every group membership it held.
    /// Returns `false` if the id was not live.
    #[instrument(skip(self))]
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(&id) else {
            tracing::trace!("Connection already gone");
            return false;
        };

        for group in &entry.groups {
            state.remove_member(group, id);
        }

        tracing::debug!(live = state.connections.len(), "Unregistered connection");
        true
    }

    /// No-op returning `false` when the connection is not live.
    #[instrument(skip(self))]
    pub async fn join_group(&self, id: ConnectionId, group: &str) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(entry) = state.connections.get_mut(&id) else {
            tracing::trace!("Ignoring join for unknown connection");
            return false;
        };

        if entry.groups.insert(group.to_owned()) {
            state.groups.entry(group.to_owned()).or_default().insert(id);
            tracing::debug!("Connection joined group");
        }
        true
    }

    /// No-op returning `false` when the connection is not live.
    #[instrument(skip(self))]
    pub async fn leave_group(&self, id: ConnectionId, group: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&id) else {
            tracing::trace!("Ignoring leave for unknown connection");
            return false;
        };

        if entry.groups.remove(group) {
            state.remove_member(group, id);
            tracing::debug!("Connection left group");
        }
        true
    }

    /// Snapshot of the live connections matching `selector`, ordered by id.
    ///
    /// A returned target may disconnect before anything is sent to it.
    pub async fn resolve_targets(
        &self,
        selector: &TargetSelector,
    ) -> Result<Vec<Target>, RegistryError> {
        let state = self.state.read().await;
        if state.shut_down {
            return Err(RegistryError::ShutDown);
        }

        let target = |id: &ConnectionId| {
            state.connections.get(id).map(|entry| Target {
                id: *id,
                sender: entry.sender.clone(),
            })
        };

        let mut targets: Vec<Target> = match selector {
            TargetSelector::All => state.connections.keys().filter_map(target).collect(),
            TargetSelector::Group(name) => state
                .groups
                .get(name)
                .map(|members| members.iter().filter_map(target).collect())
                .unwrap_or_default(),
            TargetSelector::Single(id) => target(id).into_iter().collect(),
        };
        targets.sort_unstable_by_key(|target| target.id);

        tracing::trace!(?selector, resolved = targets.len(), "Resolved targets");
        Ok(targets)
    }

    #[cfg(test)]
    pub(crate) async fn group_members(&self, group: &str) -> Vec<ConnectionId> {
        let state = self.state.read().await;
        let mut members: Vec<_> = state
            .groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    #[cfg(test)]
    pub(crate) async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_shut_down(&self) -> bool {
        self.state.read().await.shut_down
    }

    /// Drops every connection, which closes their outbound queues, and refuses
    /// any later registration or resolution. Returns how many were dropped.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.write().await;
        state.shut_down = true;
        state.groups.clear();
        let dropped = state.connections.drain().count();

        tracing::info!(dropped, "Connection registry shut down");
        dropped
    }
}

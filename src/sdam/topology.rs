use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, watch};

use crate::{
    bson::oid::ObjectId,
    client::session::ClusterTime,
    error::Error,
    options::ServerAddress,
};

use super::{ServerDescription, TopologyDescription};

/// The client's view of the cluster.
///
/// A `Topology` does not probe servers itself. An external monitor feeds it new server
/// descriptions through a [`TopologyUpdater`] and listens for re-probe requests on a
/// [`TopologyUpdateRequestReceiver`]. Every change is published as a new immutable
/// [`TopologyDescription`] snapshot; readers obtain snapshots by value through a
/// [`TopologyWatcher`] and never block writers.
#[derive(Clone, Debug)]
pub struct Topology {
    id: ObjectId,
    watcher: TopologyWatcher,
    updater: TopologyUpdater,
    update_requester: UpdateRequester,
}

impl Topology {
    /// Creates a topology whose first published snapshot is `description`.
    pub fn new(description: TopologyDescription) -> Self {
        let (watcher, updater) = TopologyWatcher::channel(description);
        let update_requester = UpdateRequester::new();

        Self {
            id: ObjectId::new(),
            watcher,
            updater,
            update_requester,
        }
    }

    /// A unique id for this topology, included in tracing events.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns a watcher positioned at the latest snapshot.
    pub fn watch(&self) -> TopologyWatcher {
        let mut watcher = self.watcher.clone();
        // mark the latest topology as seen
        watcher.receiver.borrow_and_update();
        watcher
    }

    /// Returns a handle the monitor uses to publish new server state.
    pub fn updater(&self) -> TopologyUpdater {
        self.updater.clone()
    }

    /// Returns a receiver for the re-probe requests issued by operations that observed a stale
    /// topology.
    pub fn subscribe_to_update_requests(&self) -> TopologyUpdateRequestReceiver {
        self.update_requester.subscribe()
    }

    /// The latest snapshot. Never blocks.
    pub fn current_snapshot(&self) -> Arc<TopologyDescription> {
        self.watcher.peek_latest()
    }

    /// Asks the monitor to re-probe the cluster as soon as possible.
    pub(crate) fn request_update(&self) {
        self.update_requester.request()
    }

    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.watcher.peek_latest().cluster_time().cloned()
    }

    /// Updates the topology after `error` was returned by an operation dispatched to `address`.
    ///
    /// A server that reported it is not writable, that is recovering, or that could not be
    /// reached is recorded as unknown, which clears the primary for replica sets, and the
    /// monitor is asked to re-probe.
    pub(crate) fn handle_application_error(&self, address: &ServerAddress, error: &Error) -> bool {
        if !error.is_state_change_error() {
            return false;
        }

        let changed = self.updater.mark_unknown(address, error.to_string());
        self.request_update();
        changed
    }
}

/// Publishes new topology snapshots.
///
/// Each method derives a new snapshot from the latest one and publishes it only if something
/// changed, so watchers are not woken spuriously.
#[derive(Clone, Debug)]
pub struct TopologyUpdater {
    sender: Arc<watch::Sender<Arc<TopologyDescription>>>,
}

impl TopologyUpdater {
    /// Replaces the description of one server as a whole. Returns whether the topology changed.
    pub fn update_server(&self, server_description: ServerDescription) -> bool {
        self.modify(|description| {
            if description.get_server_description(&server_description.address)
                == Some(&server_description)
            {
                return false;
            }
            description.update(server_description);
            true
        })
    }

    /// Records `address` as unknown. Returns whether the topology changed.
    pub fn mark_unknown(&self, address: &ServerAddress, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.modify(|description| description.mark_unknown(address, reason))
    }

    /// Advances the topology's cluster time if `to` is newer than the current one. Returns
    /// whether the topology changed.
    pub fn advance_cluster_time(&self, to: &ClusterTime) -> bool {
        self.modify(|description| description.advance_cluster_time(to))
    }

    /// Publishes an entirely new snapshot. The cluster time never moves backwards: if the
    /// current snapshot has a newer one, it is carried over.
    pub fn replace(&self, mut new_description: TopologyDescription) {
        self.sender.send_modify(|current| {
            if let Some(cluster_time) = current.cluster_time() {
                new_description.advance_cluster_time(cluster_time);
            }
            *current = Arc::new(new_description);
        });
    }

    fn modify(&self, f: impl FnOnce(&mut TopologyDescription) -> bool) -> bool {
        self.sender.send_if_modified(|current| {
            let mut next = TopologyDescription::clone(current);
            if !f(&mut next) {
                return false;
            }
            *current = Arc::new(next);
            true
        })
    }
}

/// Observes the snapshots a [`Topology`] publishes.
#[derive(Clone, Debug)]
pub struct TopologyWatcher {
    receiver: watch::Receiver<Arc<TopologyDescription>>,
}

impl TopologyWatcher {
    fn channel(initial_description: TopologyDescription) -> (TopologyWatcher, TopologyUpdater) {
        let (tx, rx) = watch::channel(Arc::new(initial_description));
        let watcher = TopologyWatcher { receiver: rx };
        let updater = TopologyUpdater {
            sender: Arc::new(tx),
        };
        (watcher, updater)
    }

    /// Returns the latest snapshot and marks it as seen.
    pub fn clone_latest(&mut self) -> Arc<TopologyDescription> {
        self.receiver.borrow_and_update().clone()
    }

    /// Returns the latest snapshot without marking it as seen.
    pub fn peek_latest(&self) -> Arc<TopologyDescription> {
        self.receiver.borrow().clone()
    }

    /// Waits for a snapshot newer than the last one seen by this watcher. Returns whether one
    /// was published before `timeout` elapsed.
    pub async fn wait_for_update(&mut self, timeout: Duration) -> bool {
        let changed = tokio::time::timeout(timeout, self.receiver.changed())
            .await
            .is_ok_and(|result| result.is_ok());
        self.receiver.borrow_and_update();
        changed
    }
}

#[derive(Clone, Debug)]
struct UpdateRequester {
    sender: broadcast::Sender<()>,
}

impl UpdateRequester {
    fn new() -> UpdateRequester {
        let (tx, _) = broadcast::channel(1);
        UpdateRequester { sender: tx }
    }

    fn request(&self) {
        let _ = self.sender.send(());
    }

    fn subscribe(&self) -> TopologyUpdateRequestReceiver {
        TopologyUpdateRequestReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receives the re-probe requests issued when an operation observes a stale topology.
#[derive(Debug)]
pub struct TopologyUpdateRequestReceiver {
    receiver: broadcast::Receiver<()>,
}

impl TopologyUpdateRequestReceiver {
    /// Waits until a re-probe is requested or `timeout` elapses. Returns whether a request was
    /// received.
    pub async fn wait_for_update_request(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.receiver.recv()).await,
            Ok(Ok(()) | Err(broadcast::error::RecvError::Lagged(_)))
        )
    }

    /// Discards any pending request.
    pub fn clear_update_requests(&mut self) {
        let _: std::result::Result<_, _> = self.receiver.try_recv();
    }
}

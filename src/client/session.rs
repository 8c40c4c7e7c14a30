mod cluster_time;
mod pool;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp};
pub use cluster_time::ClusterTime;
pub(crate) use pool::ServerSessionPool;

/// A logical session. Operations that carry the same session are causally ordered by the server.
///
/// A `ClientSession` is a cheap handle: clones refer to the same session. Sessions are obtained
/// from [`Client::start_session`](crate::Client::start_session), or created implicitly by the
/// client for the duration of a single operation when none is given. When the last handle is
/// dropped the underlying server session is returned to the client's pool for reuse.
#[derive(Clone, Debug)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: Document,
    is_implicit: bool,
    logical_session_timeout: Option<Duration>,
    pool: ServerSessionPool,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    server_session: ServerSession,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
}

impl ClientSession {
    pub(crate) fn new(
        server_session: ServerSession,
        pool: ServerSessionPool,
        is_implicit: bool,
        logical_session_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: server_session.id.clone(),
                is_implicit,
                logical_session_timeout,
                pool,
                state: Mutex::new(SessionState {
                    server_session,
                    cluster_time: None,
                    operation_time: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The id of this session, sent to the server as `lsid`.
    pub fn id(&self) -> &Document {
        &self.inner.id
    }

    /// Whether this session was created by the client for a single operation rather than
    /// started by the caller.
    pub fn is_implicit(&self) -> bool {
        self.inner.is_implicit
    }

    /// The highest seen cluster time this session has seen so far.
    /// This will be `None` if this session has not been used in an operation yet.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.state().cluster_time.clone()
    }

    /// Set the cluster time to the provided one if it is greater than this session's highest seen
    /// cluster time or if this session's cluster time is `None`.
    pub fn advance_cluster_time(&self, to: &ClusterTime) {
        let mut state = self.state();
        if state.cluster_time.as_ref().map(|ct| ct < to).unwrap_or(true) {
            state.cluster_time = Some(to.clone());
        }
    }

    /// Advance operation time for this session. If the provided timestamp is earlier than this
    /// session's current operation time, then the operation time is unchanged.
    pub fn advance_operation_time(&self, ts: Timestamp) {
        let mut state = self.state();
        state.operation_time = match state.operation_time {
            Some(current_op_time) if current_op_time < ts => Some(ts),
            None => Some(ts),
            current => current,
        }
    }

    /// The operation time returned by the last operation executed in this session.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.state().operation_time
    }

    /// Marks the server session as dirty after a network error, so that it is discarded rather
    /// than reused.
    pub(crate) fn mark_dirty(&self) {
        self.state().server_session.dirty = true;
    }

    /// Updates the date that the underlying server session was last used as part of an operation
    /// sent to the server.
    pub(crate) fn update_last_use(&self) {
        self.state().server_session.last_use = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.state().server_session.dirty
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        self.pool
            .check_in(state.server_session.clone(), self.logical_session_timeout);
    }
}

/// Client side abstraction of a server session. These are pooled and may be associated with
/// multiple `ClientSession`s over the course of their lifetime.
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    /// The id of the server session to which this corresponds.
    id: Document,

    /// The last time an operation was executed with this session.
    last_use: Instant,

    /// Whether a network error was encountered while using this session.
    dirty: bool,
}

impl ServerSession {
    /// Creates a new session, generating the id client side.
    fn new() -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
        }
    }

    /// Determines if this server session is about to expire in a short amount of time (1 minute).
    fn is_about_to_expire(&self, logical_session_timeout: Option<Duration>) -> bool {
        let timeout = match logical_session_timeout {
            Some(t) => t,
            None => return false,
        };
        let expiration_date = self.last_use + timeout;
        expiration_date < Instant::now() + Duration::from_secs(60)
    }
}

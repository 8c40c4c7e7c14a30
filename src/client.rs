mod executor;
pub mod session;

use std::{sync::Arc, time::Instant};

use derive_where::derive_where;

pub(crate) use executor::{HELLO_COMMAND_NAMES, REDACTED_COMMANDS};

use self::session::{ClientSession, ServerSessionPool};
use crate::{
    conn::Transport,
    error::{Error, ErrorKind, Result},
    event::{command::CommandEvent, CommandEventBus, EventHandler, SubscriptionId},
    options::ClientOptions,
    sdam::{attempt_to_select_server, SelectedServer, Topology},
    selection_criteria::ReadPreference,
    trace::{
        command::CommandTracingEventEmitter,
        server_selection::{SelectionStep, ServerSelectionTracer},
        trace_or_log_enabled,
        TracingOrLogLevel,
        COMMAND_TRACING_EVENT_TARGET,
    },
};

/// This is the entry point for executing operations against a MongoDB deployment.
///
/// A `Client` does not open connections or monitor servers itself. It is handed the
/// [`Topology`] that an external monitor keeps current and the [`Transport`] that owns the
/// connections, and combines them: every [`execute`](Client::execute) call selects a server from
/// the latest topology snapshot, renders the operation for that server's capabilities, dispatches
/// it, and retries it once on a transient failure.
///
/// `Client` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html) internally,
/// so it can safely be shared across threads or async tasks. For example:
///
/// ```rust
/// # use mongodb_executor::{bson::doc, error::Result, operation::{Namespace, Operation}, Client};
/// #
/// # async fn start_workers(client: Client) -> Result<()> {
/// for i in 0..5 {
///     let client_ref = client.clone();
///
///     tokio::task::spawn(async move {
///         let insert = Operation::insert(Namespace::new("items", "coll"), vec![doc! { "i": i }]);
///         client_ref.execute(insert).await
///     });
/// }
/// #
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[allow(dead_code, unreachable_code, clippy::diverging_sub_expression)]
const _: fn() = || {
    fn assert_send<T: Send>(_t: T) {}
    fn assert_sync<T: Sync>(_t: T) {}

    let _c: super::Client = todo!();
    assert_send(_c);
    assert_sync(_c);
};

#[derive_where(Debug)]
struct ClientInner {
    topology: Topology,
    options: ClientOptions,
    #[derive_where(skip)]
    transport: Arc<dyn Transport>,
    event_bus: CommandEventBus,
    session_pool: ServerSessionPool,
}

impl Client {
    /// Creates a new `Client` that selects servers from `topology` and sends commands through
    /// `transport`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a `tokio` runtime, since the client's [`CommandEventBus`]
    /// spawns its delivery task.
    pub fn new(options: ClientOptions, topology: Topology, transport: impl Transport) -> Self {
        Self::with_transport(options, topology, Arc::new(transport))
    }

    /// Creates a new `Client` sharing an existing `transport`.
    pub fn with_transport(
        options: ClientOptions,
        topology: Topology,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                topology,
                options,
                transport,
                event_bus: CommandEventBus::new(),
                session_pool: ServerSessionPool::new(),
            }),
        }
    }

    /// Gets the options used to create this `Client`.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Gets the topology this `Client` selects servers from.
    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// Gets the bus that delivers this client's command events.
    pub fn event_bus(&self) -> &CommandEventBus {
        &self.inner.event_bus
    }

    /// Registers `handler` for the [`CommandEvent`]s of every operation this client executes.
    pub fn subscribe(&self, handler: impl Into<EventHandler<CommandEvent>>) -> SubscriptionId {
        self.inner.event_bus.subscribe(handler)
    }

    /// Removes a subscription made with [`Client::subscribe`].
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.event_bus.unsubscribe(id)
    }

    /// Starts a new explicit [`ClientSession`]. Operations given this session via
    /// [`Operation::session`](crate::operation::Operation::session) are causally ordered.
    pub fn start_session(&self) -> ClientSession {
        self.new_session(false)
    }

    pub(crate) fn start_implicit_session(&self) -> ClientSession {
        self.new_session(true)
    }

    fn new_session(&self, is_implicit: bool) -> ClientSession {
        let logical_session_timeout = self
            .inner
            .topology
            .current_snapshot()
            .logical_session_timeout();
        ClientSession::new(
            self.inner.session_pool.check_out(logical_session_timeout),
            self.inner.session_pool.clone(),
            is_implicit,
            logical_session_timeout,
        )
    }

    /// Emits a command event to tracing and, when `to_subscribers` is set, to the subscribers. The
    /// event is only built when it will be used. Returns whether it was handed to the subscribers.
    pub(crate) fn emit_command_event(
        &self,
        to_subscribers: bool,
        generate_event: impl FnOnce() -> CommandEvent,
    ) -> bool {
        let tracing_emitter = if trace_or_log_enabled!(
            target: COMMAND_TRACING_EVENT_TARGET,
            TracingOrLogLevel::Debug
        ) {
            Some(CommandTracingEventEmitter::new(
                self.inner.options.max_document_length_bytes(),
                self.inner.topology.id(),
            ))
        } else {
            None
        };
        let publish = to_subscribers && self.inner.event_bus.has_subscribers();
        if tracing_emitter.is_none() && !publish {
            return false;
        }

        let event = generate_event();
        if let Some(ref tracing_emitter) = tracing_emitter {
            tracing_emitter.handle(&event);
        }
        if publish {
            self.inner.event_bus.publish(event);
        }
        publish
    }

    /// Selects a server for `criteria`, waiting for newer topology snapshots until one is
    /// suitable or the server selection timeout elapses.
    ///
    /// A snapshot without a primary does not fail a primary selection here: the failed primary
    /// is usually being replaced, so selection waits for the monitor to publish the new one.
    pub(crate) async fn select_server(
        &self,
        criteria: &ReadPreference,
        operation_name: &str,
    ) -> Result<SelectedServer> {
        let start_time = Instant::now();
        let timeout = self.inner.options.server_selection_timeout();
        let topology = &self.inner.topology;

        let tracer = ServerSelectionTracer {
            topology_id: topology.id(),
            criteria,
            operation_name,
            deadline: start_time.checked_add(timeout).unwrap_or(start_time),
        };
        let mut watcher = topology.watch();
        tracer.trace(&watcher.peek_latest(), SelectionStep::Started);
        let mut waiting = false;

        loop {
            let description = watcher.clone_latest();
            match attempt_to_select_server(
                &description,
                criteria,
                self.inner.options.local_threshold(),
            ) {
                Ok(Some(server)) => {
                    tracer.trace(&description, SelectionStep::Succeeded(&server));
                    return Ok(server);
                }
                Ok(None) => {}
                Err(error) if matches!(*error.kind, ErrorKind::NoPrimaryAvailable { .. }) => {}
                Err(error) => {
                    tracer.trace(&description, SelectionStep::Failed(&error));
                    return Err(error);
                }
            }

            if !waiting {
                tracer.trace(&description, SelectionStep::Waiting);
                waiting = true;
            }

            let remaining = timeout.saturating_sub(start_time.elapsed());
            if remaining.is_zero() {
                let error = Error::server_selection_timeout(
                    description.server_selection_timeout_error_message(criteria),
                );
                tracer.trace(&description, SelectionStep::Failed(&error));
                return Err(error);
            }

            topology.request_update();
            watcher
                .wait_for_update(remaining.min(self.inner.options.heartbeat_frequency()))
                .await;
        }
    }
}

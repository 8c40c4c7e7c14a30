use std::{
    collections::HashSet,
    sync::LazyLock,
    time::{Duration, Instant},
};

use super::{session::ClientSession, Client};
use crate::{
    bson::{doc, Document},
    error::{Error, ErrorKind, Result, NO_WRITES_PERFORMED, RETRYABLE_WRITE_ERROR},
    event::command::{
        CommandEvent,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
    },
    operation::{
        build,
        propagate_session_and_cluster_time,
        CommandReply,
        CommandResponse,
        Operation,
    },
    options::ServerAddress,
    sdam::SelectedServer,
    trace::COMMAND_TRACING_EVENT_TARGET,
};

pub(crate) static REDACTED_COMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    let mut hash_set = HashSet::new();
    hash_set.insert("authenticate");
    hash_set.insert("saslstart");
    hash_set.insert("saslcontinue");
    hash_set.insert("getnonce");
    hash_set.insert("createuser");
    hash_set.insert("updateuser");
    hash_set.insert("copydbgetnonce");
    hash_set.insert("copydbsaslstart");
    hash_set.insert("copydb");
    hash_set
});
pub(crate) static HELLO_COMMAND_NAMES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    let mut hash_set = HashSet::new();
    hash_set.insert("hello");
    hash_set.insert("ismaster");
    hash_set
});

impl Client {
    /// Executes `op`.
    ///
    /// The operation is validated, a server is selected for it from the latest topology
    /// snapshot, and it is rendered for that server and dispatched. If no explicit session was
    /// given, an acknowledged operation against a server that supports sessions runs in an
    /// implicit one.
    ///
    /// An acknowledged operation that fails with a network error or because the server was no
    /// longer the primary is retried once, against a freshly selected server, unless
    /// [`ClientOptions::retry_writes`](crate::options::ClientOptions::retry_writes) is `false`.
    /// Write errors and write concern errors reported by the server are never retried; they are
    /// returned as [`ErrorKind::Write`].
    ///
    /// Every dispatch attempt produces one started event followed by one succeeded or failed
    /// event, including when the returned future is dropped while a command is in flight.
    pub async fn execute(&self, op: Operation) -> Result<CommandReply> {
        op.validate()?;
        self.execute_operation_with_retry(&op).await
    }

    async fn execute_operation_with_retry(&self, op: &Operation) -> Result<CommandReply> {
        let mut retry: Option<ExecutionRetry> = None;
        let mut implicit_session: Option<ClientSession> = None;

        loop {
            let server = match self
                .select_server(&op.selection_criteria(), op.command_name())
                .await
            {
                Ok(server) => server,
                Err(err) => {
                    retry.first_error()?;
                    return Err(err);
                }
            };

            if op.get_session().is_none()
                && implicit_session.is_none()
                && server.stream_description.supports_sessions()
                && op.is_acknowledged()
            {
                implicit_session = Some(self.start_implicit_session());
            }
            let session = op.get_session().or(implicit_session.as_ref());

            match self.execute_operation_on_server(op, &server, session).await {
                Ok(reply) => return Ok(reply),
                Err(mut err) => {
                    self.inner
                        .topology
                        .handle_application_error(&server.address, &err);

                    let can_retry = self.is_retry_eligible(op) && err.is_write_retryable();
                    if can_retry {
                        err.add_label(RETRYABLE_WRITE_ERROR);
                    }

                    if let Some(r) = retry {
                        if (err.is_server_error() || err.is_write_retryable())
                            && !err.contains_label(NO_WRITES_PERFORMED)
                        {
                            return Err(err);
                        } else {
                            return Err(r.first_error);
                        }
                    } else if can_retry {
                        tracing::debug!(
                            target: COMMAND_TRACING_EVENT_TARGET,
                            commandName = op.command_name(),
                            serverHost = server.address.host(),
                            serverPort = server.address.port(),
                            "Retrying operation after error: {}",
                            err,
                        );
                        retry = Some(ExecutionRetry { first_error: err });
                        continue;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Whether a failed attempt of `op` may be retried at all. Unacknowledged writes are never
    /// retried since their outcome is unknown.
    fn is_retry_eligible(&self, op: &Operation) -> bool {
        op.is_acknowledged() && self.inner.options.retry_writes()
    }

    /// Executes one attempt of `op` on `server`.
    async fn execute_operation_on_server(
        &self,
        op: &Operation,
        server: &SelectedServer,
        session: Option<&ClientSession>,
    ) -> Result<CommandReply> {
        let description = &server.stream_description;
        let mut cmd = build(op, description)?;
        self.inner
            .topology
            .current_snapshot()
            .update_command_with_read_pref(&server.address, &mut cmd, &op.selection_criteria());
        propagate_session_and_cluster_time(
            &mut cmd,
            op,
            description,
            session,
            self.inner.topology.cluster_time().as_ref(),
        );

        let should_redact = cmd.should_redact();
        let cmd_name = cmd.name.clone();
        let target_db = cmd.target_db.clone();
        let message = cmd.into_wire_message()?;
        let request_id = message.request_id();
        let more_to_come = message.more_to_come();

        let started_published = self.emit_command_event(true, || {
            let command_body = if should_redact {
                Document::new()
            } else {
                message.get_command_document()
            };
            CommandEvent::Started(CommandStartedEvent {
                command: command_body,
                db: target_db.clone(),
                command_name: cmd_name.clone(),
                request_id,
                address: server.address.clone(),
            })
        });

        let mut in_flight = CommandInFlight {
            client: self,
            request_id,
            command_name: cmd_name,
            address: server.address.clone(),
            should_redact,
            started_published,
            start_time: Instant::now(),
            completed: false,
        };
        let send_result = self
            .inner
            .transport
            .send_message(&server.address, message)
            .await;
        let duration = in_flight.start_time.elapsed();

        if let Some(session) = session {
            session.update_last_use();
        }

        let command_result = match send_result {
            Ok(Some(raw)) => {
                CommandResponse::new(server.address.clone(), raw).and_then(|response| {
                    self.update_cluster_time(&response, session);
                    response.validate()?;
                    Ok(Some(response))
                })
            }
            Ok(None) if more_to_come => Ok(None),
            Ok(None) => Err(Error::invalid_response(
                "the server did not reply to an acknowledged command",
            )),
            Err(err) => Err(err),
        };

        match command_result {
            Err(err) => {
                in_flight.failed(duration, &err);

                if let Some(session) = session {
                    if err.is_network_error() {
                        session.mark_dirty();
                    }
                }

                Err(err)
            }
            Ok(None) => {
                in_flight.succeeded(duration, || doc! { "ok": 1 });
                Ok(CommandReply::unacknowledged(server.address.clone()))
            }
            Ok(Some(response)) => {
                in_flight.succeeded(duration, || response.body.clone());
                if !op.is_acknowledged() {
                    return Ok(CommandReply::unacknowledged(response.address));
                }
                response.into_reply(op.is_ordered())
            }
        }
    }

    /// Advances the topology's and the session's clocks to the times reported in `response`.
    fn update_cluster_time(&self, response: &CommandResponse, session: Option<&ClientSession>) {
        if let Some(cluster_time) = response.cluster_time() {
            self.inner
                .topology
                .updater()
                .advance_cluster_time(cluster_time);
            if let Some(session) = session {
                session.advance_cluster_time(cluster_time);
            }
        }

        if let (Some(session), Some(operation_time)) = (session, response.operation_time()) {
            session.advance_operation_time(operation_time);
        }
    }
}

/// A dispatched command whose terminal event has not been emitted yet. If it is dropped first,
/// because the future executing the operation was dropped, a failed event with
/// [`ErrorKind::Cancelled`] is emitted in its place.
///
/// The terminal event only reaches the subscribers if the started event did.
struct CommandInFlight<'a> {
    client: &'a Client,
    request_id: i32,
    command_name: String,
    address: ServerAddress,
    should_redact: bool,
    started_published: bool,
    start_time: Instant,
    completed: bool,
}

impl CommandInFlight<'_> {
    fn succeeded(&mut self, duration: Duration, reply: impl FnOnce() -> Document) {
        self.completed = true;
        self.client.emit_command_event(self.started_published, || {
            let reply = if self.should_redact {
                Document::new()
            } else {
                reply()
            };

            CommandEvent::Succeeded(CommandSucceededEvent {
                duration,
                reply,
                command_name: self.command_name.clone(),
                request_id: self.request_id,
                address: self.address.clone(),
            })
        });
    }

    fn failed(&mut self, duration: Duration, failure: &Error) {
        self.completed = true;
        self.client.emit_command_event(self.started_published, || {
            let mut failure = failure.clone();
            if self.should_redact {
                failure.redact();
            }

            CommandEvent::Failed(CommandFailedEvent {
                duration,
                command_name: self.command_name.clone(),
                failure,
                request_id: self.request_id,
                address: self.address.clone(),
            })
        });
    }
}

impl Drop for CommandInFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let duration = self.start_time.elapsed();
            self.failed(duration, &ErrorKind::Cancelled.into());
        }
    }
}

#[derive(Debug)]
struct ExecutionRetry {
    first_error: Error,
}

trait RetryHelper {
    fn first_error(&mut self) -> Result<()>;
}

impl RetryHelper for Option<ExecutionRetry> {
    fn first_error(&mut self) -> Result<()> {
        match self.take() {
            Some(r) => Err(r.first_error),
            None => Ok(()),
        }
    }
}

use crate::{
    bson::oid::ObjectId,
    event::command::CommandEvent,
    serde_util,
    trace::{serialize_command_or_reply, TracingRepresentation, COMMAND_TRACING_EVENT_TARGET},
};

/// Type responsible for converting command monitoring events to tracing events and emitting
/// them.
pub(crate) struct CommandTracingEventEmitter {
    max_document_length_bytes: usize,
    topology_id: ObjectId,
}

impl CommandTracingEventEmitter {
    pub(crate) fn new(
        max_document_length_bytes: usize,
        topology_id: ObjectId,
    ) -> CommandTracingEventEmitter {
        CommandTracingEventEmitter {
            max_document_length_bytes,
            topology_id,
        }
    }

    pub(crate) fn handle(&self, event: &CommandEvent) {
        match event {
            CommandEvent::Started(event) => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    topologyId = self.topology_id.tracing_representation(),
                    command = serialize_command_or_reply(&event.command, self.max_document_length_bytes),
                    databaseName = event.db,
                    commandName = event.command_name,
                    requestId = event.request_id,
                    serverHost = event.address.host(),
                    serverPort = event.address.port(),
                    "Command started"
                );
            }
            CommandEvent::Succeeded(event) => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    topologyId = self.topology_id.tracing_representation(),
                    reply = serialize_command_or_reply(&event.reply, self.max_document_length_bytes),
                    commandName = event.command_name,
                    requestId = event.request_id,
                    serverHost = event.address.host(),
                    serverPort = event.address.port(),
                    durationMS = event.duration.as_millis(),
                    "Command succeeded"
                );
            }
            CommandEvent::Failed(event) => {
                let mut failure = event.failure.tracing_representation();
                serde_util::truncate_on_char_boundary(&mut failure, self.max_document_length_bytes);
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    topologyId = self.topology_id.tracing_representation(),
                    failure,
                    commandName = event.command_name,
                    requestId = event.request_id,
                    serverHost = event.address.host(),
                    serverPort = event.address.port(),
                    durationMS = event.duration.as_millis(),
                    "Command failed"
                );
            }
        }
    }
}

use std::time::Instant;

use super::{
    trace_or_log_enabled,
    TracingOrLogLevel,
    TracingRepresentation,
    SERVER_SELECTION_TRACING_EVENT_TARGET,
};
use crate::{
    bson::oid::ObjectId,
    error::Error,
    sdam::{SelectedServer, TopologyDescription},
    selection_criteria::ReadPreference,
};

/// A point in one call to `Client::select_server`.
pub(crate) enum SelectionStep<'a> {
    Started,
    /// No suitable server in the current snapshot; logged once per selection.
    Waiting,
    Succeeded(&'a SelectedServer),
    Failed(&'a Error),
}

/// Logs the progress of one server selection against the snapshots it looked at.
pub(crate) struct ServerSelectionTracer<'a> {
    pub(crate) topology_id: ObjectId,
    pub(crate) criteria: &'a ReadPreference,
    pub(crate) operation_name: &'a str,
    pub(crate) deadline: Instant,
}

impl ServerSelectionTracer<'_> {
    pub(crate) fn trace(&self, topology: &TopologyDescription, step: SelectionStep<'_>) {
        let enabled = match step {
            SelectionStep::Waiting => trace_or_log_enabled!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                TracingOrLogLevel::Info
            ),
            _ => trace_or_log_enabled!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                TracingOrLogLevel::Debug
            ),
        };
        if !enabled {
            return;
        }

        let topology_id = self.topology_id.tracing_representation();
        let selector = self.criteria.tracing_representation();
        let topology_description = topology.tracing_representation();

        match step {
            SelectionStep::Started => tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = topology_id,
                operation = self.operation_name,
                selector,
                topologyDescription = topology_description,
                "Server selection started"
            ),
            SelectionStep::Waiting => tracing::info!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = topology_id,
                operation = self.operation_name,
                selector,
                topologyDescription = topology_description,
                remainingTimeMS = self
                    .deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis(),
                "Waiting for suitable server to become available"
            ),
            SelectionStep::Succeeded(server) => tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = topology_id,
                operation = self.operation_name,
                selector,
                topologyDescription = topology_description,
                serverHost = server.address.host(),
                serverPort = server.address.port(),
                "Server selection succeeded"
            ),
            SelectionStep::Failed(error) => tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                topologyId = topology_id,
                operation = self.operation_name,
                selector,
                topologyDescription = topology_description,
                failure = error.tracing_representation(),
                "Server selection failed"
            ),
        }
    }
}

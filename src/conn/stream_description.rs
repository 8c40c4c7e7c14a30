use std::time::Duration;

use typed_builder::TypedBuilder;

/// The first wire version that understands OP_MSG, sessions and cluster time (MongoDB 3.6).
pub(crate) const OP_MSG_MIN_WIRE_VERSION: i32 = 6;

/// The negotiated capabilities of one server, as reported by its most recent probe.
///
/// A `StreamDescription` is never updated in place: the monitor replaces the whole value each
/// time it re-probes the server, so readers never observe a mix of two probes.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct StreamDescription {
    /// The maximum wire version that the server understands.
    pub max_wire_version: i32,

    /// How long sessions started on this server will stay alive without executing an operation
    /// before the server kills them. `None` means the server does not support sessions.
    #[builder(default, setter(strip_option))]
    pub logical_session_timeout: Option<Duration>,

    /// Whether the server reported a `$clusterTime` in its handshake.
    #[builder(default)]
    pub cluster_time_supported: bool,

    /// The maximum size of a single document that may be sent to the server.
    #[builder(default = 16 * 1024 * 1024)]
    pub max_bson_object_size: i64,

    /// The maximum number of inserts, updates, or deletes that can be included in a write batch.
    #[builder(default = 100_000)]
    pub max_write_batch_size: i64,

    /// The maximum permitted size of a wire protocol message.
    #[builder(default = 48_000_000)]
    pub max_message_size_bytes: i32,
}

/// The two ways a command can be rendered onto the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageMode {
    /// A single OP_QUERY against the `$cmd` pseudo-collection.
    Legacy,

    /// An OP_MSG with a body section and document sequences.
    Modern,
}

impl StreamDescription {
    /// Whether commands for this server are sent as OP_MSG.
    pub fn supports_op_msg(&self) -> bool {
        self.max_wire_version >= OP_MSG_MIN_WIRE_VERSION
    }

    /// Whether this server understands logical session ids.
    pub fn supports_sessions(&self) -> bool {
        self.logical_session_timeout.is_some() && self.max_wire_version >= OP_MSG_MIN_WIRE_VERSION
    }

    /// Whether this server accepts and reports `$clusterTime`.
    pub fn supports_cluster_time(&self) -> bool {
        self.cluster_time_supported && self.max_wire_version >= OP_MSG_MIN_WIRE_VERSION
    }

    pub(crate) fn message_mode(&self) -> MessageMode {
        if self.supports_op_msg() {
            MessageMode::Modern
        } else {
            MessageMode::Legacy
        }
    }

    /// Gets a description of a stream for a 4.2 server that supports every capability.
    #[cfg(test)]
    pub(crate) fn new_testing() -> Self {
        Self::with_wire_version(8)
    }

    /// Gets a description of a stream for a server with the provided maxWireVersion. Sessions
    /// and cluster time are enabled whenever the wire version allows them.
    #[cfg(test)]
    pub(crate) fn with_wire_version(max_wire_version: i32) -> Self {
        Self {
            max_wire_version,
            logical_session_timeout: Some(Duration::from_secs(30 * 60)),
            cluster_time_supported: true,
            max_bson_object_size: 16 * 1024 * 1024,
            max_write_batch_size: 100_000,
            max_message_size_bytes: 48_000_000,
        }
    }
}

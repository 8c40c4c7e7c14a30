use crate::{
    bson::{oid::ObjectId, Bson, Document},
    error::Error,
    sdam::TopologyDescription,
    selection_criteria::ReadPreference,
    serde_util,
};

pub(crate) mod command;
pub(crate) mod server_selection;

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb_executor::command";
pub(crate) const SERVER_SELECTION_TRACING_EVENT_TARGET: &str =
    "mongodb_executor::server_selection";

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for ObjectId {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_hex()
    }
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

impl TracingRepresentation for ReadPreference {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}

impl TracingRepresentation for TopologyDescription {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}

/// Renders a command or reply as relaxed extended JSON, truncated to `max_length` bytes.
pub(crate) fn serialize_command_or_reply(document: &Document, max_length: usize) -> String {
    let mut serialized = document.tracing_representation();
    serde_util::truncate_on_char_boundary(&mut serialized, max_length);
    serialized
}

/// We don't currently use all of these levels but they are included for completeness.
#[allow(dead_code)]
pub(crate) enum TracingOrLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl TracingOrLogLevel {
    pub(crate) const fn as_log_level(&self) -> log::Level {
        match self {
            TracingOrLogLevel::Error => log::Level::Error,
            TracingOrLogLevel::Warn => log::Level::Warn,
            TracingOrLogLevel::Info => log::Level::Info,
            TracingOrLogLevel::Debug => log::Level::Debug,
            TracingOrLogLevel::Trace => log::Level::Trace,
        }
    }

    pub(crate) const fn as_tracing_level(&self) -> tracing::Level {
        match self {
            TracingOrLogLevel::Error => tracing::Level::ERROR,
            TracingOrLogLevel::Warn => tracing::Level::WARN,
            TracingOrLogLevel::Info => tracing::Level::INFO,
            TracingOrLogLevel::Debug => tracing::Level::DEBUG,
            TracingOrLogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Pending https://github.com/tokio-rs/tracing/issues/2036 we can remove this and just use tracing::enabled.
macro_rules! trace_or_log_enabled {
    (target: $target:expr, $lvl:expr) => {
        tracing::enabled!(target: $target, $lvl.as_tracing_level())
            || log::log_enabled!(target: $target, $lvl.as_log_level())
    };
}
pub(crate) use trace_or_log_enabled;

#[cfg(test)]
mod test {
    use super::serialize_command_or_reply;
    use crate::bson::doc;

    #[test]
    fn long_documents_are_truncated() {
        let document = doc! { "insert": "c", "documents": [{ "name": "é".repeat(100) }] };

        let full = serialize_command_or_reply(&document, usize::MAX);
        assert!(full.contains("\"insert\":\"c\""));

        let truncated = serialize_command_or_reply(&document, 30);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 33);
    }
}

//! Contains the options and configuration types used by the executor.

use std::{
    fmt,
    hash::{Hash, Hasher},
    time::Duration,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

pub use crate::{
    concern::{Acknowledgment, WriteConcern},
    selection_criteria::{ReadPreference, ReadPreferenceOptions, TagSet},
};
use crate::{
    error::{Error, Result},
    serde_util,
};

/// The default port servers listen on.
pub const DEFAULT_PORT: u16 = 27017;

pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

/// An enum representing the address of a server.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the server can be found.
        host: String,

        /// The TCP port that the server is listening on.
        ///
        /// The default is 27017.
        port: Option<u16>,
    },
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Tcp { host, port },
                Self::Tcp {
                    host: other_host,
                    port: other_port,
                },
            ) => {
                host == other_host
                    && port.unwrap_or(DEFAULT_PORT) == other_port.unwrap_or(DEFAULT_PORT)
            }
        }
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        match self {
            Self::Tcp { host, port } => {
                host.hash(state);
                port.unwrap_or(DEFAULT_PORT).hash(state);
            }
        }
    }
}

impl ServerAddress {
    /// Parses an address string into a `ServerAddress`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');
        let hostname = match parts.next() {
            Some(part) if !part.is_empty() => part,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid server address: \"{address}\"; hostname cannot be empty"
                )))
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str_radix(part, 10).map_err(|_| {
                    Error::invalid_argument(format!(
                        "port must be valid 16-bit unsigned integer, instead got: {part}"
                    ))
                })?;

                if port == 0 {
                    return Err(Error::invalid_argument(format!(
                        "invalid server address: \"{address}\"; port must be non-zero"
                    )));
                }
                if parts.next().is_some() {
                    return Err(Error::invalid_argument(format!(
                        "address \"{address}\" contains more than one unescaped ':'"
                    )));
                }

                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress::Tcp {
            host: hostname.to_lowercase(),
            port,
        })
    }

    /// The host portion of this address.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port portion of this address, defaulting to 27017.
    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => {
                write!(fmt, "{}:{}", host, port.unwrap_or(DEFAULT_PORT))
            }
        }
    }
}

impl Serialize for ServerAddress {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str()).map_err(|e| serde::de::Error::custom(format!("{e}")))
    }
}

/// Configuration for a [`Client`](crate::Client).
///
/// Every field is optional; unset fields fall back to the documented defaults.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, PartialEq)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ClientOptions {
    /// The application name, included in log output.
    pub app_name: Option<String>,

    /// Whether acknowledged writes that fail with a transient network or "not writable primary"
    /// error are retried once against a freshly selected primary.
    ///
    /// The default value is true.
    pub retry_writes: Option<bool>,

    /// How long server selection may wait for a suitable server before failing.
    ///
    /// The default value is 30 seconds.
    #[serde(
        rename = "serverSelectionTimeoutMS",
        default,
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub server_selection_timeout: Option<Duration>,

    /// The width of the latency window used when choosing between several suitable servers.
    ///
    /// The default value is 15 milliseconds.
    #[serde(
        rename = "localThresholdMS",
        default,
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub local_threshold: Option<Duration>,

    /// The longest server selection waits for a topology change before re-evaluating the
    /// current snapshot.
    ///
    /// The default value is 10 seconds.
    #[serde(
        rename = "heartbeatFrequencyMS",
        default,
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub heartbeat_frequency: Option<Duration>,

    /// The maximum length of documents included in tracing events, in bytes.
    ///
    /// The default value is 1000.
    pub max_document_length_bytes: Option<usize>,
}

impl ClientOptions {
    pub(crate) fn retry_writes(&self) -> bool {
        self.retry_writes.unwrap_or(true)
    }

    pub(crate) fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT)
    }

    pub(crate) fn local_threshold(&self) -> Duration {
        self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD)
    }

    pub(crate) fn heartbeat_frequency(&self) -> Duration {
        self.heartbeat_frequency
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY)
    }

    pub(crate) fn max_document_length_bytes(&self) -> usize {
        self.max_document_length_bytes
            .unwrap_or(DEFAULT_MAX_DOCUMENT_LENGTH_BYTES)
    }
}

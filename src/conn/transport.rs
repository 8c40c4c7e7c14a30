use futures_core::future::BoxFuture;

use super::WireMessage;
use crate::{bson::RawDocumentBuf, error::Result, options::ServerAddress};

/// The seam between the execution core and the connection layer.
///
/// Implementations own connection establishment, pooling, TLS and authentication. The core hands
/// over a fully rendered message and the address of the server it selected, and expects back the
/// server's reply document.
///
/// Failures to reach the server or to read its reply should be reported with
/// [`Error::network`](crate::error::Error::network) so that they are classified as retryable.
/// Dropping the returned future abandons the in-flight request.
pub trait Transport: Send + Sync + 'static {
    /// Sends `message` to the server at `address`.
    ///
    /// Returns `Ok(None)` without waiting for a reply when [`WireMessage::more_to_come`] is set,
    /// since the server will not send one.
    fn send_message<'a>(
        &'a self,
        address: &'a ServerAddress,
        message: WireMessage,
    ) -> BoxFuture<'a, Result<Option<RawDocumentBuf>>>;
}

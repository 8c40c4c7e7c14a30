//! Contains the events and functionality for monitoring command execution.

mod bus;
pub mod command;

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;

pub use self::bus::{CommandEventBus, SubscriptionId};

/// A destination for events. Allows implicit conversion via [`From`] for `tokio` senders:
///
/// ```rust
/// # use mongodb_executor::event::{command::CommandEvent, EventHandler};
/// # fn example() {
/// let (tx, mut rx) = tokio::sync::mpsc::channel(100);
/// tokio::spawn(async move {
///     while let Some(ev) = rx.recv().await {
///         println!("{:?}", ev);
///     }
/// });
/// let handler: EventHandler<CommandEvent> = tx.into();
/// # }
/// ```
///
/// or explicit construction for `Fn` traits:
///
/// ```rust
/// # use mongodb_executor::event::{command::CommandEvent, EventHandler};
/// let handler = EventHandler::<CommandEvent>::callback(|ev| println!("{:?}", ev));
/// ```
///
/// Handlers are invoked one at a time, in publication order, on a task owned by the
/// [`CommandEventBus`]; a handler that panics is logged and otherwise ignored.
#[derive(Clone)]
#[non_exhaustive]
pub enum EventHandler<T> {
    /// A callback.
    Callback(Arc<dyn Fn(T) + Sync + Send>),
    /// An async callback.
    AsyncCallback(Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Sync + Send>),
    /// A `tokio` channel sender.
    TokioMpsc(tokio::sync::mpsc::Sender<T>),
}

impl<T> std::fmt::Debug for EventHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventHandler").finish()
    }
}

impl<T> From<tokio::sync::mpsc::Sender<T>> for EventHandler<T> {
    fn from(value: tokio::sync::mpsc::Sender<T>) -> Self {
        Self::TokioMpsc(value)
    }
}

impl<T: Send + Sync + 'static> EventHandler<T> {
    /// Construct a new event handler with a callback.
    pub fn callback(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(f))
    }

    /// Construct a new event handler with an async callback.
    pub fn async_callback(f: impl Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static) -> Self {
        Self::AsyncCallback(Arc::new(f))
    }

    /// Delivers `event`, returning once the handler is done with it. A panic inside the handler
    /// is caught and reported as `Err`.
    pub(crate) async fn handle(&self, event: T) -> std::result::Result<(), HandlerPanic> {
        match self {
            Self::Callback(cb) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| (cb)(event))).map_err(HandlerPanic)
            }
            Self::AsyncCallback(cb) => {
                let future = std::panic::catch_unwind(AssertUnwindSafe(|| (cb)(event)))
                    .map_err(HandlerPanic)?;
                AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .map_err(HandlerPanic)
            }
            Self::TokioMpsc(sender) => {
                // a closed receiver means the subscriber stopped listening
                let _ = sender.send(event).await;
                Ok(())
            }
        }
    }
}

/// The payload of a panic raised by an event handler.
pub(crate) struct HandlerPanic(Box<dyn std::any::Any + Send>);

impl HandlerPanic {
    pub(crate) fn message(&self) -> &str {
        if let Some(message) = self.0.downcast_ref::<&'static str>() {
            *message
        } else if let Some(message) = self.0.downcast_ref::<String>() {
            message.as_str()
        } else {
            "non-string panic payload"
        }
    }
}

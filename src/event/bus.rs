use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::sync::{mpsc, oneshot};

use super::{command::CommandEvent, EventHandler};
use crate::trace::COMMAND_TRACING_EVENT_TARGET;

/// Identifies a subscription made with [`CommandEventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum BusMessage {
    Subscribe(SubscriptionId, EventHandler<CommandEvent>),
    Unsubscribe(SubscriptionId),
    Publish(CommandEvent),
    Flush(oneshot::Sender<()>),
}

/// The registry of command event subscribers of one client.
///
/// Publishing never waits for subscribers: events are queued and handed to every subscriber, in
/// subscription order, by a task the bus owns. Because one task delivers every event in the order
/// it was published, each subscriber sees a command's started event before its terminal event.
/// A subscriber only receives the terminal events of commands whose started event it received.
/// The task exits once the bus is dropped and the queue is drained.
#[derive(Debug)]
pub struct CommandEventBus {
    sender: mpsc::UnboundedSender<BusMessage>,
    next_id: AtomicU64,
    subscribers: Arc<AtomicUsize>,
}

impl std::fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe(id, _) => f.debug_tuple("Subscribe").field(id).finish(),
            Self::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
            Self::Publish(event) => f.debug_tuple("Publish").field(event).finish(),
            Self::Flush(_) => f.debug_tuple("Flush").finish(),
        }
    }
}

impl CommandEventBus {
    /// Creates a bus with no subscribers.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a `tokio` runtime, since the bus spawns its delivery task.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscribers = Arc::new(AtomicUsize::new(0));
        tokio::spawn(deliver(receiver, subscribers.clone()));

        Self {
            sender,
            next_id: AtomicU64::new(0),
            subscribers,
        }
    }

    /// Registers `handler`. It receives every started event published after this call returns,
    /// followed by the terminal event of the same command.
    pub fn subscribe(&self, handler: impl Into<EventHandler<CommandEvent>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        self.send(BusMessage::Subscribe(id, handler.into()));
        id
    }

    /// Removes the subscription `id`. Events published before this call are still delivered to
    /// it.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.send(BusMessage::Unsubscribe(id));
    }

    /// Whether any subscription is registered.
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.load(Ordering::SeqCst) > 0
    }

    /// Waits until every event published so far has been handed to the subscribers.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(BusMessage::Flush(done));
        let _ = wait.await;
    }

    pub(crate) fn publish(&self, event: impl Into<CommandEvent>) {
        self.send(BusMessage::Publish(event.into()));
    }

    fn send(&self, message: BusMessage) {
        // the delivery task only exits once every sender is gone
        let _ = self.sender.send(message);
    }
}

impl Default for CommandEventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler<CommandEvent>,
    /// Request ids whose started event was delivered and whose terminal event is outstanding.
    in_flight: HashSet<i32>,
}

impl Subscriber {
    /// Whether `event` belongs to a command this subscriber has seen start.
    fn accepts(&mut self, event: &CommandEvent) -> bool {
        if event.is_terminal() {
            self.in_flight.remove(&event.request_id())
        } else {
            self.in_flight.insert(event.request_id());
            true
        }
    }
}

async fn deliver(
    mut receiver: mpsc::UnboundedReceiver<BusMessage>,
    subscriber_count: Arc<AtomicUsize>,
) {
    let mut subscribers: Vec<Subscriber> = Vec::new();

    while let Some(message) = receiver.recv().await {
        match message {
            BusMessage::Subscribe(id, handler) => subscribers.push(Subscriber {
                id,
                handler,
                in_flight: HashSet::new(),
            }),
            BusMessage::Unsubscribe(id) => {
                let before = subscribers.len();
                subscribers.retain(|subscriber| subscriber.id != id);
                if subscribers.len() < before {
                    subscriber_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
            BusMessage::Publish(event) => {
                for subscriber in subscribers.iter_mut() {
                    if !subscriber.accepts(&event) {
                        continue;
                    }
                    if let Err(panic) = subscriber.handler.handle(event.clone()).await {
                        tracing::warn!(
                            target: COMMAND_TRACING_EVENT_TARGET,
                            subscription = ?subscriber.id,
                            requestId = event.request_id(),
                            commandName = event.command_name(),
                            "Command event subscriber panicked: {}",
                            panic.message(),
                        );
                    }
                }
            }
            BusMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

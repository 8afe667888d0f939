use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::Stream;

/// An event fanned out to in-process listeners.
pub trait LocalEvent: Any + Send + Sync + fmt::Debug {}

type DynEvent = Arc<dyn Any + Send + Sync>;

/// All the currently active subscriptions of one component.
#[derive(Default)]
pub struct Subscriptions {
    /// Tracks the subscribers for each event, keyed by the event type
    subs: HashMap<TypeId, Vec<EventSubscription>>,
}

impl Subscriptions {
    /// Register a new listener for `T` and return its stream.
    ///
    /// Every call creates a dedicated channel, so duplicate registration is
    /// impossible; dropping the stream removes exactly that listener.
    pub fn listen<T: LocalEvent>(&mut self) -> EventStream<T> {
        let (tx, rx) = unbounded();
        self.subs
            .entry(TypeId::of::<T>())
            .or_default()
            .push(EventSubscription { listener: tx });
        EventStream::new(rx)
    }

    /// Fan an event out to all listeners of its type, unregistering the
    /// listeners whose receiving side is gone.
    pub fn publish<T: LocalEvent>(&mut self, event: T) {
        if let Some(subs) = self.subs.get_mut(&TypeId::of::<T>()) {
            let event: DynEvent = Arc::new(event);
            subs.retain(|sub| sub.send(event.clone()));
        }
    }

    /// Drop all listeners; their streams terminate.
    pub fn clear(&mut self) {
        self.subs.clear();
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("listeners", &self.subs.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

/// Represents a single event listener
struct EventSubscription {
    /// the sender half of the event channel
    listener: UnboundedSender<DynEvent>,
}

impl EventSubscription {
    fn send(&self, event: DynEvent) -> bool {
        self.listener.unbounded_send(event).is_ok()
    }
}

/// The receiver part of an event subscription
pub struct EventStream<T> {
    events: UnboundedReceiver<DynEvent>,
    _marker: PhantomData<T>,
}

impl<T> EventStream<T> {
    fn new(events: UnboundedReceiver<DynEvent>) -> Self {
        Self {
            events,
            _marker: PhantomData,
        }
    }
}

impl<T: LocalEvent + Unpin> Stream for EventStream<T> {
    type Item = Arc<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();
        loop {
            match Stream::poll_next(Pin::new(&mut pin.events), cx) {
                Poll::Ready(Some(event)) => {
                    // the registry keys channels by type, so this only skips
                    // events if a foreign sender was smuggled in
                    if let Ok(event) = event.downcast::<T>() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

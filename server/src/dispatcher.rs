//! Publish/subscribe table routing decoded messages to handlers by event code.
//!
//! Handlers run synchronously, in subscription order, and get mutable
//! access to the state the dispatcher was published against. A handler
//! that wants to raise another event does so through the [`Publisher`] it
//! is handed; those follow-ups are delivered once the current handler
//! list has finished. Handlers never see the subscriber table itself, so
//! it cannot change mid-publish.

use crate::registry::Entity;
use log::{debug, warn};
use shared::SerializedEvent;
use std::collections::{HashMap, VecDeque};

/// Upper bound on follow-up events raised while handling one publish.
pub const MAX_CASCADE: usize = 64;

/// An event together with the entity whose session sent it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: Option<Entity>,
    pub event: SerializedEvent,
}

/// Queue handed to handlers for raising follow-up events.
#[derive(Debug, Default)]
pub struct Publisher {
    pending: VecDeque<Envelope>,
}

impl Publisher {
    pub fn publish(&mut self, source: Option<Entity>, code: u16, payload: impl Into<Vec<u8>>) {
        self.pending.push_back(Envelope {
            source,
            event: SerializedEvent::new(code, payload),
        });
    }
}

pub type Handler<S> = Box<dyn FnMut(&Envelope, &mut S, &mut Publisher) + Send>;

pub struct Dispatcher<S> {
    handlers: HashMap<u16, Vec<Handler<S>>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> Dispatcher<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, code: u16, handler: F)
    where
        F: FnMut(&Envelope, &mut S, &mut Publisher) + Send + 'static,
    {
        self.handlers.entry(code).or_default().push(Box::new(handler));
    }

    pub fn subscriber_count(&self, code: u16) -> usize {
        self.handlers.get(&code).map_or(0, Vec::len)
    }

    /// Delivers `envelope` and any follow-ups it triggers.
    /// Returns how many handler invocations took place.
    pub fn publish(&mut self, state: &mut S, envelope: Envelope) -> usize {
        let mut publisher = Publisher::default();
        let mut invoked = self.deliver(state, &envelope, &mut publisher);

        let mut cascaded = 0;
        while let Some(next) = publisher.pending.pop_front() {
            if cascaded == MAX_CASCADE {
                warn!(
                    "Dropping {} follow-up events after reaching the cascade limit",
                    publisher.pending.len() + 1
                );
                break;
            }
            cascaded += 1;
            invoked += self.deliver(state, &next, &mut publisher);
        }

        invoked
    }

    fn deliver(&mut self, state: &mut S, envelope: &Envelope, publisher: &mut Publisher) -> usize {
        let code = envelope.event.code;
        let Some(handlers) = self.handlers.get_mut(&code) else {
            debug!(
                "No handler for event code {:#06x} ({} byte payload)",
                code,
                envelope.event.payload.len()
            );
            return 0;
        };

        for handler in handlers.iter_mut() {
            handler(envelope, state, publisher);
        }
        handlers.len()
    }
}

//! Push notification of decoded samples
//!
//! The dashboard (or any other consumer) subscribes once at startup and is
//! called for every sample a listener accepts, after it has been logged.

use crate::types::{Sample, SignalEvent, Transport};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError, RwLock};

type Subscriber = Box<dyn Fn(&SignalEvent) + Send + Sync>;

/// Fan-out of samples to registered subscribers
#[derive(Default)]
pub struct SignalBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked on the publishing listener's thread
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Register a channel subscriber; events are delivered in publish order
    ///
    /// Once the receiver is dropped, further events for it are discarded.
    pub fn subscribe_channel(&self) -> Receiver<SignalEvent> {
        let (tx, rx) = mpsc::channel();
        let tx: Mutex<Sender<SignalEvent>> = Mutex::new(tx);
        self.subscribe(move |event| {
            let _ = tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(*event);
        });
        rx
    }

    /// Deliver a sample to every subscriber
    pub fn publish(&self, transport: Transport, sample: Sample) {
        let event = SignalEvent { transport, sample };
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        for subscriber in subscribers.iter() {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

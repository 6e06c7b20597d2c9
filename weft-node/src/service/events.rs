//! Event publication.
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time;

use crossbeam_channel as chan;

use weft::node::Event;

/// Publishes events to subscribers. Clonable; all clones share subscribers.
#[derive(Debug, Clone)]
pub struct Emitter<T> {
    subscribers: Arc<Mutex<Vec<chan::Sender<T>>>>,
}

impl<T: Clone> Emitter<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publish an event to all subscribers, dropping the ones that are gone.
    pub fn emit(&self, event: T) {
        self.subscribers
            .lock()
            .expect("Emitter::emit: lock poisoned")
            .retain(|sub| sub.send(event.clone()).is_ok());
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> chan::Receiver<T> {
        let (sender, receiver) = chan::unbounded();
        self.subscribers
            .lock()
            .expect("Emitter::subscribe: lock poisoned")
            .push(sender);

        receiver
    }
}

/// Events feed.
pub struct Events(chan::Receiver<Event>);

impl From<chan::Receiver<Event>> for Events {
    fn from(value: chan::Receiver<Event>) -> Self {
        Self(value)
    }
}

impl Deref for Events {
    type Target = chan::Receiver<Event>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Events {
    /// Listen for events, and wait for the given predicate to return
    /// `true`, or time out.
    pub fn wait<F>(
        &self,
        mut f: F,
        timeout: time::Duration,
    ) -> Result<Event, chan::RecvTimeoutError>
    where
        F: FnMut(&Event) -> bool,
    {
        let start = time::Instant::now();

        loop {
            if let Some(timeout) = timeout.checked_sub(start.elapsed()) {
                match self.recv_timeout(timeout) {
                    Ok(event) => {
                        if f(&event) {
                            return Ok(event);
                        }
                    }
                    Err(err @ chan::RecvTimeoutError::Disconnected) => {
                        return Err(err);
                    }
                    Err(chan::RecvTimeoutError::Timeout) => {
                        continue;
                    }
                }
            } else {
                return Err(chan::RecvTimeoutError::Timeout);
            }
        }
    }
}

//! The snapshot cache.
//!
//! Single writer (the service loop), many readers (discovery streams).
//! Readers see a consistent snapshot via an atomic pointer swap; only the
//! latest snapshot is retained. Subscribers are signaled on every publish.
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel as chan;

use crate::xds::{Cluster, Listener, Snapshot};

#[derive(Default)]
struct State {
    /// Version counter. Strictly increasing across publishes.
    version: u64,
    /// The latest snapshot, if any was published.
    snapshot: Option<Arc<Snapshot>>,
}

/// Versioned snapshot store with change notification.
#[derive(Default)]
pub struct Cache {
    state: RwLock<State>,
    subscribers: Mutex<Vec<chan::Sender<()>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot built from the given resources, assigning it
    /// the next version, and signal every subscriber.
    pub fn publish(&self, clusters: Vec<Cluster>, listeners: Vec<Listener>) -> Arc<Snapshot> {
        let snapshot = {
            let mut state = self.state.write().expect("Cache::publish: lock poisoned");
            state.version += 1;

            let snapshot = Arc::new(Snapshot {
                version: state.version.to_string(),
                listeners,
                clusters,
            });
            state.snapshot = Some(snapshot.clone());
            snapshot
        };
        self.notify();

        snapshot
    }

    /// The latest snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.state
            .read()
            .expect("Cache::latest: lock poisoned")
            .snapshot
            .clone()
    }

    /// Version of the latest snapshot, if any.
    pub fn version(&self) -> Option<String> {
        self.latest().map(|s| s.version.clone())
    }

    /// Subscribe to change signals. The returned channel holds at most one
    /// pending signal; consecutive publishes coalesce. The channel
    /// disconnects when the cache is closed.
    pub fn subscribe(&self) -> chan::Receiver<()> {
        let (sender, receiver) = chan::bounded(1);
        self.subscribers
            .lock()
            .expect("Cache::subscribe: lock poisoned")
            .push(sender);

        receiver
    }

    /// Disconnect all subscribers. Streams waiting on change signals will
    /// observe a closed channel and terminate.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .expect("Cache::close: lock poisoned")
            .clear();
    }

    fn notify(&self) {
        self.subscribers
            .lock()
            .expect("Cache::notify: lock poisoned")
            .retain(|sub| match sub.try_send(()) {
                Ok(()) => true,
                // A pending signal is already there; the reader will catch up.
                Err(chan::TrySendError::Full(())) => true,
                Err(chan::TrySendError::Disconnected(())) => false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str) -> Cluster {
        Cluster {
            name: name.to_owned(),
            address: "10.0.0.1".to_owned(),
            port: 8080,
        }
    }

    #[test]
    fn test_versions_increase() {
        let cache = Cache::new();
        assert_eq!(cache.version(), None);

        let s1 = cache.publish(vec![cluster("a")], vec![]);
        let s2 = cache.publish(vec![cluster("a"), cluster("b")], vec![]);

        assert_eq!(s1.version, "1");
        assert_eq!(s2.version, "2");
        assert!(s1.version < s2.version, "lexicographic order agrees");
        assert_eq!(cache.version().as_deref(), Some("2"));
    }

    #[test]
    fn test_only_latest_is_retained() {
        let cache = Cache::new();
        cache.publish(vec![cluster("a")], vec![]);
        cache.publish(vec![cluster("b")], vec![]);

        let latest = cache.latest().unwrap();
        assert_eq!(latest.clusters[0].name, "b");
    }

    #[test]
    fn test_subscriber_signaled() {
        let cache = Cache::new();
        let signals = cache.subscribe();

        cache.publish(vec![cluster("a")], vec![]);
        assert!(signals.try_recv().is_ok());

        // Signals coalesce: two publishes, one pending signal.
        cache.publish(vec![cluster("b")], vec![]);
        cache.publish(vec![cluster("c")], vec![]);
        assert!(signals.try_recv().is_ok());
        assert!(signals.try_recv().is_err());

        // The reader always observes the latest snapshot.
        assert_eq!(cache.latest().unwrap().clusters[0].name, "c");
    }

    #[test]
    fn test_close_disconnects_subscribers() {
        let cache = Cache::new();
        let signals = cache.subscribe();

        cache.close();
        assert!(matches!(signals.try_recv(), Err(chan::TryRecvError::Disconnected)));
    }
}

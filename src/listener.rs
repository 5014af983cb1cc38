//! Listener fan-out: propagates "tile available" notifications to every
//! registered `TileListener`.
//!
//! Grounded on the fire-and-forget dispatch style used across this
//! retrieval pack's `log`-instrumented crates (maplibre-rs): listeners are
//! plain trait objects, not actors, so the registry owns no background
//! thread of its own — it runs on whichever thread published the tile.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::region::RegionRequest;
use crate::server::TileListener;

/// Thread-safe listener list with snapshot-then-iterate fan-out semantics:
/// a listener added or removed mid-notification never affects the
/// in-flight call (§5 "Ordering guarantees").
pub struct ListenerRegistry<T> {
    listeners: RwLock<Vec<Arc<dyn TileListener<T>>>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn TileListener<T>>) {
        self.listeners.write().push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn TileListener<T>>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Notify every listener registered at the instant this call began.
    pub fn notify(&self, server_path: &str, request: &RegionRequest, tile: &T) {
        let snapshot: Vec<Arc<dyn TileListener<T>>> = self.listeners.read().clone();
        for listener in &snapshot {
            listener.tile_available(server_path, request, tile);
        }
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingListener;

    fn req() -> RegionRequest {
        RegionRequest::new("slideA", 1.0, 0, 0, 256, 256, 0, 0)
    }

    #[test]
    fn notify_reaches_every_listener() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        let a = Arc::new(CountingListener::new());
        let b = Arc::new(CountingListener::new());
        registry.add(a.clone());
        registry.add(b.clone());

        registry.notify("slideA", &req(), &7u8);

        assert_eq!(a.notifications(), 1);
        assert_eq!(b.notifications(), 1);
    }

    #[test]
    fn removed_listener_stops_receiving_notifications() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        let a: Arc<dyn TileListener<u8>> = Arc::new(CountingListener::new());
        registry.add(a.clone());
        registry.remove(&a);

        registry.notify("slideA", &req(), &7u8);
        assert!(registry.is_empty());
    }

    #[test]
    fn notification_carries_server_path_and_request() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        let listener = Arc::new(CountingListener::new());
        registry.add(listener.clone());

        let request = req();
        registry.notify("slideA", &request, &9u8);

        let (path, seen_request) = listener.last().expect("one notification recorded");
        assert_eq!(path, "slideA");
        assert_eq!(seen_request, request);
    }
}

//! Message bus and worktree watcher (§4.13): an in-process publish/
//! subscribe keyed by topic string, and the `Watcher` trait the manager
//! subscribes auto-sync repositories to. Grounded in the "message bus"
//! external collaborator named in §1 and the `repo.setwktree`/
//! `repo.unsetwktree` notification points documented in §6.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type Callback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct MessageBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Callback)>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        MessageBus::default()
    }

    pub fn subscribe(&self, topic: &str, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        if let Some(list) = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(topic)
        {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    pub fn publish(&self, topic: &str, payload: &str) {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = subscribers.get(topic) {
            for (_, callback) in list {
                callback(payload);
            }
        }
    }
}

/// Handle returned by `Watcher::subscribe`, passed back to `unsubscribe`.
pub struct WatchHandle(pub u64);

/// Filesystem change notification source the manager subscribes
/// auto-sync repositories to. A real implementation would wrap
/// inotify/FSEvents/ReadDirectoryChangesW; that lives at the sync-manager
/// layer named in §1, out of scope here, so only the no-op test double
/// ships in this crate.
pub trait Watcher: Send + Sync {
    fn subscribe(&self, path: &str) -> WatchHandle;
    fn unsubscribe(&self, handle: WatchHandle);
}

#[derive(Default)]
pub struct NoopWatcher {
    next_id: AtomicU64,
}

impl Watcher for NoopWatcher {
    fn subscribe(&self, _path: &str) -> WatchHandle {
        WatchHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn unsubscribe(&self, _handle: WatchHandle) {}
}

pub fn shared_noop_watcher() -> Arc<dyn Watcher> {
    Arc::new(NoopWatcher::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn publish_invokes_matching_subscribers_only() {
        let bus = MessageBus::new();
        let setwktree_hits = Arc::new(AtomicUsize::new(0));
        let unsetwktree_hits = Arc::new(AtomicUsize::new(0));
        let s1 = Arc::clone(&setwktree_hits);
        let u1 = Arc::clone(&unsetwktree_hits);
        bus.subscribe(
            "repo.setwktree",
            Box::new(move |_| {
                s1.fetch_add(1, Ordering::Relaxed);
            }),
        );
        bus.subscribe(
            "repo.unsetwktree",
            Box::new(move |_| {
                u1.fetch_add(1, Ordering::Relaxed);
            }),
        );
        bus.publish("repo.setwktree", "/tmp/repo");
        assert_eq!(setwktree_hits.load(Ordering::Relaxed), 1);
        assert_eq!(unsetwktree_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(
            "topic",
            Box::new(move |_| {
                h.fetch_add(1, Ordering::Relaxed);
            }),
        );
        bus.unsubscribe("topic", id);
        bus.publish("topic", "payload");
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn noop_watcher_round_trips_handles() {
        let watcher = NoopWatcher::default();
        let handle = watcher.subscribe("/tmp/repo");
        watcher.unsubscribe(handle);
    }
}

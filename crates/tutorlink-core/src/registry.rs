//! The connection registry.
//!
//! Maps a teacher id to its currently-live connection and holds the
//! pending-delivery queue for teachers that are offline. A binding is
//! ephemeral: the registry starts empty on every process restart, and a
//! teacher with no binding is merely unreachable, not ineligible.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use tutorlink_protocol::ServerEvent;

/// A live connection's identity plus its outbox.
///
/// The `conn_id` distinguishes two connections claiming the same teacher
/// id; [`ConnectionRegistry::unbind`] uses it so a stale disconnect can
/// never evict a fresher binding.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(conn_id: impl Into<String>, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            conn_id: conn_id.into(),
            tx,
        }
    }

    /// The connection id this handle belongs to.
    #[must_use]
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Best-effort delivery into the connection's outbox.
    ///
    /// Returns `false` if the connection task has already gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Teacher-id to connection bindings, pending deliveries, and notification
/// interest.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// teacher id -> live connection. Last write wins.
    bindings: DashMap<String, ConnectionHandle>,
    /// teacher id -> events queued while the teacher was offline, in
    /// arrival order. Unbounded; flushed and cleared on the next bind.
    pending: DashMap<String, Vec<ServerEvent>>,
    /// user id -> connections that declared interest in that user's
    /// notifications.
    watchers: DashMap<String, Vec<ConnectionHandle>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a teacher to a connection, displacing any previous binding,
    /// and drain that teacher's pending queue.
    ///
    /// The caller delivers the returned events; they are already removed
    /// from the queue.
    pub fn bind(&self, teacher_id: &str, handle: ConnectionHandle) -> Vec<ServerEvent> {
        debug!(teacher = %teacher_id, connection = %handle.conn_id, "Teacher bound");
        self.bindings.insert(teacher_id.to_string(), handle);
        self.pending
            .remove(teacher_id)
            .map(|(_, queued)| queued)
            .unwrap_or_default()
    }

    /// Unbind a teacher, but only if the binding still belongs to
    /// `conn_id`. A disconnect racing a reconnect is a no-op here.
    pub fn unbind(&self, teacher_id: &str, conn_id: &str) -> bool {
        let removed = self
            .bindings
            .remove_if(teacher_id, |_, handle| handle.conn_id == conn_id)
            .is_some();
        if removed {
            debug!(teacher = %teacher_id, connection = %conn_id, "Teacher unbound");
        }
        removed
    }

    /// The live connection for a teacher, if any.
    #[must_use]
    pub fn lookup(&self, teacher_id: &str) -> Option<ConnectionHandle> {
        self.bindings.get(teacher_id).map(|h| h.value().clone())
    }

    /// Queue an event for an offline teacher, preserving arrival order.
    pub fn enqueue_pending(&self, teacher_id: &str, event: ServerEvent) {
        trace!(teacher = %teacher_id, "Queued pending delivery");
        self.pending
            .entry(teacher_id.to_string())
            .or_default()
            .push(event);
    }

    /// Number of queued deliveries for a teacher.
    #[must_use]
    pub fn pending_len(&self, teacher_id: &str) -> usize {
        self.pending.get(teacher_id).map_or(0, |q| q.len())
    }

    /// Register interest in notifications addressed to `user_id`. A
    /// connection re-declaring interest replaces its earlier registration.
    pub fn watch_notifications(&self, user_id: &str, handle: ConnectionHandle) {
        let mut watchers = self.watchers.entry(user_id.to_string()).or_default();
        watchers.retain(|w| w.conn_id != handle.conn_id);
        watchers.push(handle);
    }

    /// Deliver an event to every connection watching `user_id`.
    ///
    /// Returns the number of successful deliveries. Dead watchers are
    /// pruned on the way.
    pub fn notify(&self, user_id: &str, event: &ServerEvent) -> usize {
        let Some(mut watchers) = self.watchers.get_mut(user_id) else {
            return 0;
        };
        watchers.retain(|w| w.send(event.clone()));
        watchers.len()
    }

    /// Drop a closed connection from every watcher list.
    ///
    /// Teacher bindings are released via [`unbind`](Self::unbind) by the
    /// connection loop, which knows which teacher it bound.
    pub fn drop_connection(&self, conn_id: &str) {
        let empty: Vec<String> = self
            .watchers
            .iter_mut()
            .filter_map(|mut entry| {
                entry.retain(|w| w.conn_id != conn_id);
                entry.is_empty().then(|| entry.key().clone())
            })
            .collect();
        for user_id in empty {
            self.watchers.remove_if(&user_id, |_, w| w.is_empty());
        }
    }

    /// Number of live teacher bindings.
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(conn_id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(conn_id, tx), rx)
    }

    fn probe(id: &str) -> ServerEvent {
        ServerEvent::ConversationChanged {
            conversation_id: id.into(),
        }
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("conn-1");

        assert!(registry.bind("t1", h).is_empty());
        assert!(registry.lookup("t1").is_some());

        assert!(registry.unbind("t1", "conn-1"));
        assert!(registry.lookup("t1").is_none());
    }

    #[test]
    fn test_stale_unbind_cannot_evict_fresher_binding() {
        let registry = ConnectionRegistry::new();
        let (old, _rx1) = handle("conn-old");
        let (new, _rx2) = handle("conn-new");

        registry.bind("t1", old);
        registry.bind("t1", new); // reconnect displaces the old binding

        // The old connection's disconnect handler fires late.
        assert!(!registry.unbind("t1", "conn-old"));
        assert_eq!(registry.lookup("t1").unwrap().conn_id(), "conn-new");
    }

    #[test]
    fn test_pending_flushed_in_arrival_order() {
        let registry = ConnectionRegistry::new();

        registry.enqueue_pending("t1", probe("first"));
        registry.enqueue_pending("t1", probe("second"));
        assert_eq!(registry.pending_len("t1"), 2);

        let (h, _rx) = handle("conn-1");
        let flushed = registry.bind("t1", h);
        assert_eq!(flushed, vec![probe("first"), probe("second")]);

        // Queue is cleared, not re-flushed on the next bind.
        assert_eq!(registry.pending_len("t1"), 0);
        let (h2, _rx2) = handle("conn-2");
        assert!(registry.bind("t1", h2).is_empty());
    }

    #[test]
    fn test_notify_targets_only_watchers() {
        let registry = ConnectionRegistry::new();
        let (watcher, mut watcher_rx) = handle("conn-1");
        let (_bystander, mut bystander_rx) = handle("conn-2");

        registry.watch_notifications("student-1", watcher);

        assert_eq!(registry.notify("student-1", &probe("n")), 1);
        assert!(watcher_rx.try_recv().is_ok());
        assert!(bystander_rx.try_recv().is_err());

        assert_eq!(registry.notify("nobody", &probe("n")), 0);
    }

    #[test]
    fn test_drop_connection_removes_watcher() {
        let registry = ConnectionRegistry::new();
        let (watcher, mut rx) = handle("conn-1");
        registry.watch_notifications("student-1", watcher);

        registry.drop_connection("conn-1");
        assert_eq!(registry.notify("student-1", &probe("n")), 0);
        assert!(rx.try_recv().is_err());
    }
}

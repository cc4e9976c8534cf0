use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use kindred_types::frames::ServerFrame;

pub const REASON_SUPERSEDED: &str = "session superseded";
pub const REASON_IDLE: &str = "idle timeout";

/// What the writer half of a connection is asked to do.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Send `SESSION_CLOSED` with this reason, then close the socket.
    Close(String),
}

/// Live connection handle held by the registry and by the connection task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
    connected_at: DateTime<Utc>,
    /// Epoch millis of the last inbound traffic.
    last_seen: Arc<AtomicI64>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        let now = Utc::now();
        Self {
            conn_id: Uuid::new_v4(),
            tx,
            connected_at: now,
            last_seen: Arc::new(AtomicI64::new(now.timestamp_millis())),
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Refresh liveness.
    pub fn touch(&self) {
        self.last_seen
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self, now_ms: i64) -> Duration {
        let last = self.last_seen.load(Ordering::Relaxed);
        Duration::from_millis(now_ms.saturating_sub(last).max(0) as u64)
    }

    /// Returns false if the connection's writer is already gone.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn close(&self, reason: &str) {
        let _ = self.tx.send(Outbound::Close(reason.to_string()));
    }
}

/// Connected users and their single live session.
///
/// Two maps kept in step: `user_id -> handle` and `conn_id -> user_id`.
/// Both are sharded `DashMap`s, so registrations for unrelated users never
/// contend on a common lock.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<PresenceInner>,
}

#[derive(Default)]
struct PresenceInner {
    sessions: DashMap<Uuid, SessionHandle>,
    connections: DashMap<Uuid, Uuid>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the user's session. Any previous session is told
    /// it was superseded and dropped from both maps first.
    pub fn register(&self, user_id: Uuid, handle: SessionHandle) {
        let conn_id = handle.conn_id;
        match self.inner.sessions.entry(user_id) {
            Entry::Occupied(mut slot) => {
                let previous = slot.get().clone();
                previous.close(REASON_SUPERSEDED);
                self.inner.connections.remove(&previous.conn_id);
                self.inner.connections.insert(conn_id, user_id);
                slot.insert(handle);
                info!(
                    %user_id,
                    old_conn = %previous.conn_id,
                    new_conn = %conn_id,
                    "Session superseded"
                );
            }
            Entry::Vacant(slot) => {
                self.inner.connections.insert(conn_id, user_id);
                slot.insert(handle);
            }
        }
    }

    /// Remove the connection from both maps. The user entry is only removed
    /// if it still belongs to this connection. Safe to repeat.
    pub fn unregister(&self, conn_id: Uuid) -> Option<Uuid> {
        let (_, user_id) = self.inner.connections.remove(&conn_id)?;
        self.inner
            .sessions
            .remove_if(&user_id, |_, handle| handle.conn_id == conn_id);
        Some(user_id)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.sessions.contains_key(&user_id)
    }

    /// Online map for a batch of stringified ids. Entries that do not parse
    /// are left out.
    pub fn presence_map(&self, user_ids: &[String]) -> BTreeMap<String, bool> {
        user_ids
            .iter()
            .filter_map(|raw| match raw.parse::<Uuid>() {
                Ok(id) => Some((raw.clone(), self.is_online(id))),
                Err(_) => {
                    debug!(raw = %raw, "Skipping unparseable user id in presence query");
                    None
                }
            })
            .collect()
    }

    pub fn session(&self, user_id: Uuid) -> Option<SessionHandle> {
        self.inner.sessions.get(&user_id).map(|h| h.clone())
    }

    /// Push a frame to the user's live session. False if offline.
    pub fn send_to(&self, user_id: Uuid, frame: ServerFrame) -> bool {
        match self.inner.sessions.get(&user_id) {
            Some(handle) => handle.send(frame),
            None => false,
        }
    }

    /// Close and forget the user's session, e.g. on logout.
    pub fn close_user(&self, user_id: Uuid, reason: &str) -> bool {
        let Some((_, handle)) = self.inner.sessions.remove(&user_id) else {
            return false;
        };
        self.inner.connections.remove(&handle.conn_id);
        handle.close(reason);
        info!(%user_id, conn_id = %handle.conn_id, reason, "Session closed");
        true
    }

    /// Evict every session silent for longer than `max_idle`. Returns the
    /// affected users.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<Uuid> {
        let now_ms = Utc::now().timestamp_millis();
        let stale: Vec<(Uuid, Uuid)> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now_ms) > max_idle)
            .map(|entry| (*entry.key(), entry.value().conn_id))
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for (user_id, conn_id) in stale {
            // The session may have been replaced or touched since the scan.
            let removed = self.inner.sessions.remove_if(&user_id, |_, handle| {
                handle.conn_id == conn_id && handle.idle_for(now_ms) > max_idle
            });
            if let Some((_, handle)) = removed {
                self.inner.connections.remove(&conn_id);
                handle.close(REASON_IDLE);
                info!(%user_id, %conn_id, "Evicted idle session");
                evicted.push(user_id);
            }
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.inner.sessions.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(tx), rx)
    }

    #[test]
    fn register_then_unregister() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (h, _rx) = handle();
        let conn = h.conn_id();

        presence.register(user, h);
        assert!(presence.is_online(user));
        assert_eq!(presence.session_count(), 1);

        assert_eq!(presence.unregister(conn), Some(user));
        assert!(!presence.is_online(user));
        // Second call is a no-op.
        assert_eq!(presence.unregister(conn), None);
        assert_eq!(presence.session_count(), 0);
    }

    #[test]
    fn second_session_supersedes_first() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (first, mut first_rx) = handle();
        let (second, _second_rx) = handle();
        let first_conn = first.conn_id();
        let second_conn = second.conn_id();

        presence.register(user, first);
        presence.register(user, second);

        match first_rx.try_recv() {
            Ok(Outbound::Close(reason)) => assert_eq!(reason, REASON_SUPERSEDED),
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(presence.session(user).unwrap().conn_id(), second_conn);

        // The old connection's cleanup must not knock out the new session.
        assert_eq!(presence.unregister(first_conn), None);
        assert!(presence.is_online(user));
        assert_eq!(presence.unregister(second_conn), Some(user));
        assert!(!presence.is_online(user));
    }

    #[test]
    fn presence_map_skips_garbage() {
        let presence = PresenceRegistry::new();
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (h, _rx) = handle();
        presence.register(online, h);

        let map = presence.presence_map(&[
            online.to_string(),
            offline.to_string(),
            "not-a-uuid".to_string(),
        ]);
        assert_eq!(map.len(), 2);
        assert!(map[&online.to_string()]);
        assert!(!map[&offline.to_string()]);
    }

    #[test]
    fn send_to_reaches_only_online_users() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (h, mut rx) = handle();
        presence.register(user, h);

        assert!(presence.send_to(user, ServerFrame::Pong { timestamp: 1 }));
        assert!(matches!(
            rx.try_recv(),
            Ok(Outbound::Frame(ServerFrame::Pong { timestamp: 1 }))
        ));
        assert!(!presence.send_to(Uuid::new_v4(), ServerFrame::Pong { timestamp: 1 }));
    }

    #[test]
    fn close_user_sends_reason_and_clears_maps() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (h, mut rx) = handle();
        let conn = h.conn_id();
        presence.register(user, h);

        assert!(presence.close_user(user, "logged out"));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close(r)) if r == "logged out"));
        assert!(!presence.is_online(user));
        assert_eq!(presence.unregister(conn), None);
        assert!(!presence.close_user(user, "logged out"));
    }

    #[test]
    fn evict_idle_keeps_fresh_sessions() {
        let presence = PresenceRegistry::new();
        let stale_user = Uuid::new_v4();
        let fresh_user = Uuid::new_v4();
        let (stale, mut stale_rx) = handle();
        let (fresh, _fresh_rx) = handle();
        stale
            .last_seen
            .store(Utc::now().timestamp_millis() - 120_000, Ordering::Relaxed);

        presence.register(stale_user, stale);
        presence.register(fresh_user, fresh);

        let evicted = presence.evict_idle(Duration::from_secs(60));
        assert_eq!(evicted, vec![stale_user]);
        assert!(matches!(stale_rx.try_recv(), Ok(Outbound::Close(r)) if r == REASON_IDLE));
        assert!(!presence.is_online(stale_user));
        assert!(presence.is_online(fresh_user));
    }

    #[test]
    fn concurrent_registrations_leave_one_session_per_user() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let presence = presence.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let (h, rx) = handle();
                    barrier.wait();
                    presence.register(user, h);
                    rx
                })
            })
            .collect();
        let _receivers: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(presence.session_count(), 1);
        assert_eq!(presence.inner.connections.len(), 1);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use globaltalk_types::events::ServerEvent;
use globaltalk_types::models::{OnlineUser, UserIdentity};

pub type ConnId = Uuid;

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    identity: Option<UserIdentity>,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
}

/// Presence registry and event fan-out for all live connections.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events — every connected client receives these
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// Every live socket, anonymous or authenticated
    connections: RwLock<HashMap<ConnId, ConnectionEntry>>,

    /// Current connection per authenticated user id
    user_conns: RwLock<HashMap<i64, ConnId>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
                user_conns: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a new socket as anonymous. Returns (conn_id, receiver) for
    /// events targeted at this connection.
    pub async fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionEntry {
                tx,
                identity: None,
                connected_at: Utc::now(),
            },
        );
        (conn_id, rx)
    }

    /// Bind an identity to a connection. Idempotent; a later authenticate for
    /// the same user id supersedes any earlier connection's claim on it.
    pub async fn authenticate(&self, conn_id: ConnId, identity: UserIdentity) {
        let user_id = identity.user_id;
        {
            let mut connections = self.inner.connections.write().await;
            if let Some(entry) = connections.get_mut(&conn_id) {
                entry.identity = Some(identity);
            } else {
                return;
            }
        }
        self.inner.user_conns.write().await.insert(user_id, conn_id);
    }

    /// Remove a connection. Returns the identity it held, if any. The
    /// user-to-connection binding is only released when this connection still
    /// owns it — a newer connection may have taken over.
    pub async fn disconnect(&self, conn_id: ConnId) -> Option<UserIdentity> {
        let entry = self.inner.connections.write().await.remove(&conn_id)?;
        let identity = entry.identity?;

        let mut user_conns = self.inner.user_conns.write().await;
        if user_conns.get(&identity.user_id) == Some(&conn_id) {
            user_conns.remove(&identity.user_id);
        }

        Some(identity)
    }

    /// Identity currently bound to a connection, if authenticated.
    pub async fn identity_of(&self, conn_id: ConnId) -> Option<UserIdentity> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .and_then(|entry| entry.identity.clone())
    }

    /// Send a targeted event to a specific connection.
    pub async fn send_to_conn(&self, conn_id: ConnId, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(entry) = connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Send a targeted event to a user's current connection, if any. Users
    /// without a live connection simply miss the notification.
    pub async fn send_to_user(&self, user_id: i64, event: ServerEvent) {
        let conn_id = {
            let user_conns = self.inner.user_conns.read().await;
            user_conns.get(&user_id).copied()
        };
        if let Some(conn_id) = conn_id {
            self.send_to_conn(conn_id, event).await;
        }
    }

    /// Current presence totals as an `onlineCount` event.
    pub async fn online_snapshot(&self) -> ServerEvent {
        let connections = self.inner.connections.read().await;
        let total = connections.len();
        let authenticated_users: Vec<OnlineUser> = connections
            .values()
            .filter_map(|entry| entry.identity.as_ref())
            .map(|identity| OnlineUser {
                user_id: identity.user_id,
                nickname: identity.nickname.clone(),
                age_group: identity.age_group,
                gender: identity.gender.clone(),
            })
            .collect();
        let authenticated = authenticated_users.len();

        ServerEvent::OnlineCount {
            total,
            authenticated,
            anonymous: total - authenticated,
            authenticated_users,
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: i64, nickname: &str) -> UserIdentity {
        UserIdentity {
            user_id,
            email: format!("{nickname}@example.com"),
            nickname: nickname.to_string(),
            profile_image_ref: None,
            age_group: None,
            gender: None,
        }
    }

    fn counts(event: &ServerEvent) -> (usize, usize, usize) {
        match event {
            ServerEvent::OnlineCount {
                total,
                authenticated,
                anonymous,
                ..
            } => (*total, *authenticated, *anonymous),
            other => panic!("expected OnlineCount, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_tracks_anonymous_and_authenticated_split() {
        let dispatcher = Dispatcher::new();
        let (a, _rx_a) = dispatcher.register().await;
        let (_b, _rx_b) = dispatcher.register().await;

        assert_eq!(counts(&dispatcher.online_snapshot().await), (2, 0, 2));

        dispatcher.authenticate(a, identity(1, "mina")).await;
        assert_eq!(counts(&dispatcher.online_snapshot().await), (2, 1, 1));

        dispatcher.disconnect(a).await;
        assert_eq!(counts(&dispatcher.online_snapshot().await), (1, 0, 1));
    }

    #[tokio::test]
    async fn later_connection_supersedes_earlier_for_same_user() {
        let dispatcher = Dispatcher::new();
        let (old, _old_rx) = dispatcher.register().await;
        let (new, mut new_rx) = dispatcher.register().await;

        dispatcher.authenticate(old, identity(1, "mina")).await;
        dispatcher.authenticate(new, identity(1, "mina")).await;

        // Closing the superseded connection must not strand the user.
        dispatcher.disconnect(old).await;
        dispatcher
            .send_to_user(1, ServerEvent::PointsUpdated { balance: 7 })
            .await;

        match new_rx.recv().await {
            Some(ServerEvent::PointsUpdated { balance }) => assert_eq!(balance, 7),
            other => panic!("expected PointsUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_to_user_without_connection_is_a_no_op() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .send_to_user(42, ServerEvent::PointsUpdated { balance: 1 })
            .await;
    }

    #[tokio::test]
    async fn disconnect_returns_identity_once() {
        let dispatcher = Dispatcher::new();
        let (conn, _rx) = dispatcher.register().await;
        dispatcher.authenticate(conn, identity(5, "james")).await;

        assert_eq!(dispatcher.disconnect(conn).await.map(|u| u.user_id), Some(5));
        assert!(dispatcher.disconnect(conn).await.is_none());
    }
}

//! Per-session state and exclusive access to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::types::{tool_names, ToolSpec};

/// Mutable record kept for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub key: String,
    pub user_id: String,
    /// Active servers in activation order.
    #[serde(default)]
    pub active_servers: Vec<String>,
    #[serde(default)]
    pub catalog: Vec<ToolSpec>,
    /// Handle of the live gateway session. Not persisted: a restored session
    /// reconnects and re-activates its servers.
    #[serde(skip)]
    pub remote_session: Option<String>,
    pub last_activity: DateTime<Utc>,
    /// Server records returned by `mcp-find`, keyed by server name.
    #[serde(default)]
    pub discovered: HashMap<String, serde_json::Value>,
    /// Tool name to the server that contributed it.
    #[serde(default)]
    pub tool_origins: HashMap<String, String>,
    /// Script tools built through `code-mode`, with the servers they span.
    #[serde(default)]
    pub dynamic_tools: HashMap<String, Vec<String>>,
}

impl Session {
    pub fn new(key: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            user_id: user_id.into(),
            active_servers: Vec::new(),
            catalog: Vec::new(),
            remote_session: None,
            last_activity: Utc::now(),
            discovered: HashMap::new(),
            tool_origins: HashMap::new(),
            dynamic_tools: HashMap::new(),
        }
    }

    pub fn is_active(&self, server: &str) -> bool {
        self.active_servers.iter().any(|s| s == server)
    }

    /// Mark a server active. Returns false if it already was.
    pub fn activate(&mut self, server: &str) -> bool {
        if self.is_active(server) {
            return false;
        }
        self.active_servers.push(server.to_string());
        true
    }

    /// Drop a server and everything attributed to it.
    pub fn deactivate(&mut self, server: &str) -> bool {
        let before = self.active_servers.len();
        self.active_servers.retain(|s| s != server);
        self.tool_origins.retain(|_, origin| origin != server);
        before != self.active_servers.len()
    }

    /// Names of the tools currently in the catalog.
    pub fn tool_names(&self) -> Vec<String> {
        tool_names(&self.catalog)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity).to_std().unwrap_or_default()
    }
}

/// Backing store for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Session>>;
    async fn save(&self, session: Session) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop sessions idle past the store's TTL and hand them back. Stores
    /// without expiry keep everything.
    async fn purge_expired(&self) -> Result<Vec<Session>> {
        Ok(Vec::new())
    }
}

/// In-process store; sessions idle longer than the TTL are evicted on access.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(key) {
            Some(session) if session.idle_for() > self.ttl => {
                debug!(session = key, "evicting idle session");
                sessions.remove(key);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn save(&self, session: Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.key.clone(), session);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.sessions.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<Vec<Session>> {
        let mut sessions = self.sessions.write().await;
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.idle_for() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        Ok(idle
            .iter()
            .filter_map(|key| sessions.remove(key))
            .collect())
    }
}

/// Loads sessions and serializes mutating access per session key.
pub struct StateManager {
    store: Arc<dyn SessionStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemorySessionStore::new(ttl)))
    }

    /// Snapshot of a session, created on first access.
    pub async fn load(&self, key: &str, user_id: &str) -> Result<Session> {
        Ok(self
            .store
            .load(key)
            .await?
            .unwrap_or_else(|| Session::new(key, user_id)))
    }

    /// Run `f` with exclusive ownership of the session, then persist whatever
    /// session it hands back (also when the result is an error).
    pub async fn with_exclusive_session<F, Fut, T>(&self, key: &str, user_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = (Session, Result<T>)>,
    {
        let lock = self.lock_for(key).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_exclusive(key, user_id, f).await
        };
        self.release(key, lock).await;
        result
    }

    /// Discard a session, returning what was stored.
    pub async fn remove(&self, key: &str) -> Result<Option<Session>> {
        let lock = self.lock_for(key).await;
        let removed = {
            let _guard = lock.lock().await;
            match self.store.load(key).await {
                Ok(session) => self.store.remove(key).await.map(|()| session),
                Err(err) => Err(err),
            }
        };
        self.release(key, lock).await;
        removed
    }

    /// Evict idle sessions and forget locks nobody holds. Returns the
    /// evicted sessions.
    pub async fn purge_expired(&self) -> Result<Vec<Session>> {
        let evicted = self.store.purge_expired().await?;
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        debug!(evicted = evicted.len(), locks = locks.len(), "sessions purged");
        Ok(evicted)
    }

    async fn run_exclusive<F, Fut, T>(&self, key: &str, user_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = (Session, Result<T>)>,
    {
        let session = self.load(key, user_id).await?;
        let (mut session, result) = f(session).await;
        session.touch();
        self.store.save(session).await?;
        result
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Drop the key's lock entry once no other task holds or awaits it.
    ///
    /// Every holder clones the `Arc` under the map lock, so a count of two
    /// (the map and `lock`) means nobody is queued.
    async fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = Arc::strong_count(&lock) == 2
            && locks.get(key).is_some_and(|held| Arc::ptr_eq(held, &lock));
        if idle {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn load_creates_fresh_session() {
        let manager = StateManager::in_memory(Duration::from_secs(60));
        let session = manager.load("u1", "u1").await.unwrap();
        assert!(session.active_servers.is_empty());
        assert_eq!(session.user_id, "u1");
    }

    #[tokio::test]
    async fn exclusive_access_persists_changes() {
        let manager = StateManager::in_memory(Duration::from_secs(60));
        manager
            .with_exclusive_session("u1", "u1", |mut session| async move {
                session.activate("wikipedia");
                (session, Ok(()))
            })
            .await
            .unwrap();
        let session = manager.load("u1", "u1").await.unwrap();
        assert_eq!(session.active_servers, vec!["wikipedia".to_string()]);
    }

    #[tokio::test]
    async fn same_session_runs_are_serialized() {
        let manager = Arc::new(StateManager::in_memory(Duration::from_secs(60)));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let manager = manager.clone();
            let inside = inside.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .with_exclusive_session("shared", "u", |mut session| async move {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        session.activate(&format!("server-{i}"));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        (session, Ok(()))
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(manager.load("shared", "u").await.unwrap().active_servers.len(), 4);
    }

    #[tokio::test]
    async fn removal_does_not_split_the_session_lock() {
        let manager = Arc::new(StateManager::in_memory(Duration::from_secs(60)));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let (release_first, first_may_finish) = tokio::sync::oneshot::channel::<()>();

        let run = |manager: Arc<StateManager>, wait: Option<tokio::sync::oneshot::Receiver<()>>| {
            let inside = inside.clone();
            let overlap = overlap.clone();
            tokio::spawn(async move {
                manager
                    .with_exclusive_session("alice", "alice", |session| async move {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        if let Some(wait) = wait {
                            let _ = wait.await;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        (session, Ok(()))
                    })
                    .await
            })
        };

        let first = run(manager.clone(), Some(first_may_finish));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let removal = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.remove("alice").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = run(manager.clone(), None);
        tokio::time::sleep(Duration::from_millis(10)).await;

        release_first.send(()).unwrap();
        first.await.unwrap().unwrap();
        let late = run(manager.clone(), None);

        removal.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
        late.await.unwrap().unwrap();
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lock_entries_do_not_outlive_their_users() {
        let manager = StateManager::in_memory(Duration::from_secs(60));
        for key in ["a", "b", "c"] {
            manager
                .with_exclusive_session(key, key, |session| async move { (session, Ok(())) })
                .await
                .unwrap();
        }
        manager.remove("a").await.unwrap();
        assert!(manager.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn remove_returns_the_stored_session() {
        let manager = StateManager::in_memory(Duration::from_secs(60));
        manager
            .with_exclusive_session("bob", "bob", |mut session| async move {
                session.activate("wikipedia");
                (session, Ok(()))
            })
            .await
            .unwrap();
        let removed = manager.remove("bob").await.unwrap().unwrap();
        assert_eq!(removed.active_servers, vec!["wikipedia".to_string()]);
        assert!(manager.remove("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_hands_back_idle_sessions() {
        let store = Arc::new(InMemorySessionStore::new(Duration::from_secs(60)));
        let mut stale = Session::new("old", "old");
        stale.last_activity = Utc::now() - chrono::Duration::hours(1);
        store.save(stale).await.unwrap();
        store.save(Session::new("fresh", "fresh")).await.unwrap();
        let manager = StateManager::new(store.clone());

        let evicted = manager.purge_expired().await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "old");
        assert!(store.load("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        let mut stale = Session::new("old", "old");
        stale.last_activity = Utc::now() - chrono::Duration::hours(1);
        store.save(stale).await.unwrap();
        store.save(Session::new("fresh", "fresh")).await.unwrap();

        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.purge_expired().await.unwrap().is_empty());
        assert!(store.load("fresh").await.unwrap().is_some());
    }

    #[test]
    fn deactivate_forgets_tool_attribution() {
        let mut session = Session::new("k", "u");
        session.activate("github");
        session
            .tool_origins
            .insert("create_issue".into(), "github".into());
        assert!(!session.activate("github"));
        assert!(session.deactivate("github"));
        assert!(session.tool_origins.is_empty());
    }

    #[test]
    fn remote_handle_is_not_persisted() {
        let mut session = Session::new("k", "u");
        session.remote_session = Some("abc".into());
        let raw = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.remote_session, None);
    }
}

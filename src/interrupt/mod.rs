//! Suspended runs awaiting operator input, and the resume bookkeeping around them.
//!
//! An [`Interrupt`] is created the moment a tool reports missing
//! configuration. It is consumed exactly once by a successful resume; a
//! resume that still lacks configuration leaves it open with a new
//! requirement list.

pub mod file;

pub use file::FileInterruptStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agent_loop::RunContext;
use crate::error::{BridgeError, Result};
use crate::types::{ConfigRequirement, Conversation, ToolCallRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    #[default]
    ConfigRequired,
}

/// Frozen state of a suspended run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(on(String, into))]
pub struct Interrupt {
    #[builder(default = uuid::Uuid::new_v4().to_string())]
    pub id: String,
    #[builder(default)]
    pub kind: InterruptKind,
    pub session_key: String,
    pub user_id: String,
    pub server: String,
    pub required_configs: Vec<ConfigRequirement>,
    #[builder(default)]
    pub instructions: String,
    /// Conversation as it stood when the run suspended.
    pub conversation: Conversation,
    /// The call that reported missing configuration.
    pub pending_call: ToolCallRequest,
    pub run: RunContext,
    /// Iterations completed before suspension.
    pub iterations_used: usize,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default)]
    pub consumed: bool,
}

impl Interrupt {
    pub fn is_expired(&self, ttl: Duration) -> bool {
        (Utc::now() - self.created_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }

    /// What a store keeps after consumption: enough to reject a second
    /// resume, without the conversation snapshot.
    pub fn tombstone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            session_key: self.session_key.clone(),
            user_id: self.user_id.clone(),
            server: self.server.clone(),
            required_configs: Vec::new(),
            instructions: String::new(),
            conversation: Vec::new(),
            pending_call: ToolCallRequest::new(
                self.pending_call.id.clone(),
                self.pending_call.name.clone(),
                serde_json::Value::Null,
            ),
            run: self.run.clone(),
            iterations_used: self.iterations_used,
            created_at: self.created_at,
            consumed: true,
        }
    }
}

/// Storage for interrupts keyed by token.
#[async_trait]
pub trait InterruptStore: Send + Sync {
    async fn insert(&self, interrupt: Interrupt) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Interrupt>>;
    /// Overwrite an existing, unconsumed interrupt.
    async fn update(&self, interrupt: Interrupt) -> Result<()>;
    /// Atomically flag an interrupt consumed and return it in full. Only its
    /// [`Interrupt::tombstone`] stays stored.
    async fn consume(&self, id: &str) -> Result<Interrupt>;
    async fn remove(&self, id: &str) -> Result<()>;
    /// Drop every interrupt created before `cutoff`. Returns how many went.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Process-local interrupt store.
#[derive(Default)]
pub struct InMemoryInterruptStore {
    entries: Mutex<HashMap<String, Interrupt>>,
}

impl InMemoryInterruptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterruptStore for InMemoryInterruptStore {
    async fn insert(&self, interrupt: Interrupt) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(interrupt.id.clone(), interrupt);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Interrupt>> {
        Ok(self.entries.lock().await.get(id).cloned())
    }

    async fn update(&self, interrupt: Interrupt) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match entries.get(&interrupt.id) {
            None => Err(BridgeError::InterruptNotFound(interrupt.id)),
            Some(existing) if existing.consumed => {
                Err(BridgeError::InterruptAlreadyConsumed(interrupt.id))
            }
            Some(_) => {
                entries.insert(interrupt.id.clone(), interrupt);
                Ok(())
            }
        }
    }

    async fn consume(&self, id: &str) -> Result<Interrupt> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| BridgeError::InterruptNotFound(id.to_string()))?;
        if entry.consumed {
            return Err(BridgeError::InterruptAlreadyConsumed(id.to_string()));
        }
        let mut consumed = entry.clone();
        consumed.consumed = true;
        *entry = consumed.tombstone();
        Ok(consumed)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entries.lock().await.remove(id);
        Ok(())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, i| i.created_at >= cutoff);
        Ok(before - entries.len())
    }
}

/// Interrupt lifecycle on top of a store: TTL and state checks.
#[derive(Clone)]
pub struct InterruptManager {
    store: Arc<dyn InterruptStore>,
    ttl: Duration,
}

impl InterruptManager {
    pub fn new(store: Arc<dyn InterruptStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryInterruptStore::new()), ttl)
    }

    /// Persist a new interrupt and return its token.
    pub async fn suspend(&self, interrupt: Interrupt) -> Result<String> {
        let id = interrupt.id.clone();
        info!(
            interrupt_id = %id,
            session = %interrupt.session_key,
            server = %interrupt.server,
            required = interrupt.required_configs.len(),
            "run suspended"
        );
        self.store.insert(interrupt).await?;
        Ok(id)
    }

    /// Fetch a resumable interrupt. Missing or expired tokens are not found;
    /// consumed ones are reported as such. Has no side effects otherwise.
    pub async fn open(&self, id: &str) -> Result<Interrupt> {
        let interrupt = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| BridgeError::InterruptNotFound(id.to_string()))?;
        if interrupt.is_expired(self.ttl) {
            debug!(interrupt_id = id, "interrupt expired");
            self.store.remove(id).await?;
            return Err(BridgeError::InterruptNotFound(id.to_string()));
        }
        if interrupt.consumed {
            return Err(BridgeError::InterruptAlreadyConsumed(id.to_string()));
        }
        Ok(interrupt)
    }

    /// Keep the interrupt open with a fresh requirement list.
    pub async fn replace_requirements(
        &self,
        id: &str,
        required_configs: Vec<ConfigRequirement>,
        instructions: String,
    ) -> Result<Interrupt> {
        let mut interrupt = self.open(id).await?;
        interrupt.required_configs = required_configs;
        interrupt.instructions = instructions;
        self.store.update(interrupt.clone()).await?;
        info!(interrupt_id = id, "interrupt still incomplete; requirements replaced");
        Ok(interrupt)
    }

    /// Flag the interrupt consumed. Fails if another resume got there first.
    pub async fn consume(&self, id: &str) -> Result<Interrupt> {
        let interrupt = self.store.consume(id).await?;
        info!(interrupt_id = id, "interrupt consumed");
        Ok(interrupt)
    }

    /// Drop interrupts older than the TTL, consumed tombstones included.
    pub async fn purge_expired(&self) -> Result<usize> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now().checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.purge_created_before(cutoff).await
    }
}

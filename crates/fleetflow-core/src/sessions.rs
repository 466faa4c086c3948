//! Session registry: concurrency-safe map of live engine sessions.
//!
//! An explicit component with an owner, not a process-global. Entries are
//! evicted after sitting idle past the TTL; the registry owns teardown and
//! closes evicted handles itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::engine::EngineSession;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

pub struct SessionEntry {
    pub handle: Arc<dyn EngineSession>,
    pub task_id: String,
    pub agent_id: String,
    last_active: Instant,
}

impl SessionEntry {
    pub fn new(handle: Arc<dyn EngineSession>, task_id: String, agent_id: String) -> Self {
        Self {
            handle,
            task_id,
            agent_id,
            last_active: Instant::now(),
        }
    }
}

pub struct SessionRegistry {
    entries: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Register a session, replacing any previous entry under the same ID.
    /// Registration also runs an opportunistic sweep so idle sessions do not
    /// pile up between timer ticks.
    pub fn register(&self, session_id: String, entry: SessionEntry) {
        self.entries.insert(session_id, entry);
        self.sweep();
    }

    /// Look up a live session, refreshing its idle clock. Entries past the
    /// TTL are treated as absent even if the sweeper has not collected them.
    pub fn get(&self, session_id: &str) -> Option<Arc<dyn EngineSession>> {
        let mut entry = self.entries.get_mut(session_id)?;
        if entry.last_active.elapsed() > self.ttl {
            return None;
        }
        entry.last_active = Instant::now();
        Some(entry.handle.clone())
    }

    /// Atomic get-or-create: concurrent callers with the same ID always
    /// observe the same handle (the DashMap entry lock serializes them).
    pub fn get_or_register(
        &self,
        session_id: &str,
        make: impl FnOnce() -> SessionEntry,
    ) -> Arc<dyn EngineSession> {
        let mut entry = self
            .entries
            .entry(session_id.to_string())
            .or_insert_with(make);
        entry.last_active = Instant::now();
        entry.handle.clone()
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        self.entries.remove(session_id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict entries idle past the TTL and close their handles. Returns the
    /// number evicted.
    pub fn sweep(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.last_active.elapsed() > self.ttl)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            if let Some((_, entry)) = self.entries.remove(&id) {
                debug!(session_id = %id, task_id = %entry.task_id, "Evicting idle session");
                tokio::spawn(async move { entry.handle.close().await });
                evicted += 1;
            }
        }
        evicted
    }

    /// Close every session. Used on shutdown.
    pub async fn shutdown(&self) {
        let all: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in all {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.handle.close().await;
            }
        }
        info!("Session registry shut down");
    }

    /// Run `sweep` on a ticker until the shutdown channel fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.sweep();
                        if evicted > 0 {
                            info!(evicted, "Session sweep evicted idle sessions");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

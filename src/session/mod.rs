//! Server-side session state
//!
//! Sessions are keyed by the client-chosen id and outlive individual
//! WebSocket connections; they expire after a period of inactivity.

mod catalog;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub use catalog::{VoiceCatalog, VoiceInfo};
pub use registry::{ConnectionId, ConnectionRegistry, Outbound};

/// Most history entries kept per client
pub const MAX_HISTORY: usize = 100;

/// Per-client conversation state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub voice_type: String,
    pub is_paused: bool,
    pub is_processing: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// One recorded turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    history: HashMap<String, Vec<HistoryEntry>>,
}

/// Session store shared by HTTP handlers, sockets and the turn worker
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<RwLock<Inner>>,
    voices: VoiceCatalog,
    timeout: Duration,
}

impl SessionManager {
    /// Create a manager that expires sessions idle for longer than `timeout`
    #[must_use]
    pub fn new(voices: VoiceCatalog, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            voices,
            timeout,
        }
    }

    #[must_use]
    pub const fn voices(&self) -> &VoiceCatalog {
        &self.voices
    }

    /// Create a session or reset an existing one with a new voice
    ///
    /// Unknown voices fall back to the default. Pause and processing flags
    /// are cleared.
    pub async fn create_or_update(&self, client_id: &str, voice: Option<&str>) -> Session {
        let voice_type = self.voices.resolve(voice);
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let session = inner
            .sessions
            .entry(client_id.to_string())
            .and_modify(|s| {
                s.voice_type.clone_from(&voice_type);
                s.is_paused = false;
                s.is_processing = false;
                s.last_activity = now;
            })
            .or_insert_with(|| {
                tracing::info!(client_id, voice = %voice_type, "session created");
                Session {
                    voice_type: voice_type.clone(),
                    is_paused: false,
                    is_processing: false,
                    created_at: now,
                    last_activity: now,
                }
            });
        session.clone()
    }

    /// Create a session with the default voice if none exists
    pub async fn ensure(&self, client_id: &str) {
        if !self.exists(client_id).await {
            self.create_or_update(client_id, None).await;
        }
    }

    pub async fn exists(&self, client_id: &str) -> bool {
        self.inner.read().await.sessions.contains_key(client_id)
    }

    /// Fetch a session, marking it active
    pub async fn get(&self, client_id: &str) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(client_id)?;
        session.last_activity = Utc::now();
        Some(session.clone())
    }

    /// Remove a session and its history
    pub async fn delete(&self, client_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.history.remove(client_id);
        let removed = inner.sessions.remove(client_id).is_some();
        if removed {
            tracing::info!(client_id, "session deleted");
        }
        removed
    }

    pub async fn is_processing(&self, client_id: &str) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(client_id)
            .is_some_and(|s| s.is_processing)
    }

    /// Set the processing flag; returns false when the session is unknown
    pub async fn set_processing(&self, client_id: &str, processing: bool) -> bool {
        self.update(client_id, |s| s.is_processing = processing).await
    }

    /// Atomically claim the session for a turn
    ///
    /// Returns false when the session is unknown or already processing.
    pub async fn try_begin_processing(&self, client_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(client_id) {
            Some(s) if !s.is_processing => {
                s.is_processing = true;
                s.last_activity = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Claim the session for a turn, releasing it when the guard is dropped
    ///
    /// Returns `None` when the session is unknown or already processing.
    pub async fn begin_turn(&self, client_id: &str) -> Option<ProcessingGuard> {
        self.try_begin_processing(client_id)
            .await
            .then(|| ProcessingGuard {
                sessions: self.clone(),
                client_id: client_id.to_string(),
                armed: true,
            })
    }

    pub async fn is_paused(&self, client_id: &str) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(client_id)
            .is_some_and(|s| s.is_paused)
    }

    /// Set the pause flag; returns false when the session is unknown
    pub async fn set_paused(&self, client_id: &str, paused: bool) -> bool {
        self.update(client_id, |s| s.is_paused = paused).await
    }

    /// Flip the pause flag and return the new value
    pub async fn toggle_paused(&self, client_id: &str) -> Option<bool> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(client_id)?;
        session.is_paused = !session.is_paused;
        session.last_activity = Utc::now();
        Some(session.is_paused)
    }

    /// Voice for a client, falling back to the default
    pub async fn voice_type(&self, client_id: &str) -> String {
        let inner = self.inner.read().await;
        let configured = inner.sessions.get(client_id).map(|s| s.voice_type.as_str());
        self.voices.resolve(configured)
    }

    /// Change a client's voice and return the voice actually applied
    pub async fn set_voice_type(&self, client_id: &str, voice: &str) -> String {
        let resolved = self.voices.resolve(Some(voice));
        let applied = resolved.clone();
        if !self.update(client_id, move |s| s.voice_type = resolved).await {
            self.create_or_update(client_id, Some(&applied)).await;
        }
        applied
    }

    /// Record a turn
    pub async fn add_history(&self, client_id: &str, text: impl Into<String>, is_user: bool) {
        let mut inner = self.inner.write().await;
        let entries = inner.history.entry(client_id.to_string()).or_default();
        entries.push(HistoryEntry {
            text: text.into(),
            is_user,
            timestamp: Utc::now(),
        });
        if entries.len() > MAX_HISTORY {
            let excess = entries.len() - MAX_HISTORY;
            entries.drain(..excess);
        }
    }

    pub async fn history(&self, client_id: &str) -> Vec<HistoryEntry> {
        self.inner
            .read()
            .await
            .history
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Delete sessions idle longer than the timeout
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let mut inner = self.inner.write().await;

        let expired: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.sessions.remove(id);
            inner.history.remove(id);
            tracing::info!(client_id = %id, "session expired");
        }
        expired.len()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run `cleanup_expired` every `interval` until the handle is aborted
    #[must_use]
    pub fn spawn_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = manager.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "session cleanup pass");
                }
            }
        })
    }

    async fn update(&self, client_id: &str, f: impl FnOnce(&mut Session)) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(client_id) else {
            return false;
        };
        f(session);
        session.last_activity = Utc::now();
        true
    }
}

/// Holds a session's processing flag for the length of one turn
///
/// The flag is cleared by [`ProcessingGuard::release`], or from a spawned
/// task if the guard is dropped first (a cancelled or aborted turn).
pub struct ProcessingGuard {
    sessions: SessionManager,
    client_id: String,
    armed: bool,
}

impl ProcessingGuard {
    pub async fn release(mut self) {
        self.armed = false;
        self.sessions.set_processing(&self.client_id, false).await;
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let sessions = self.sessions.clone();
        let client_id = std::mem::take(&mut self.client_id);

        // Fast path when nothing else holds the lock
        if let Ok(mut inner) = sessions.inner.try_write() {
            if let Some(session) = inner.sessions.get_mut(&client_id) {
                session.is_processing = false;
            }
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    sessions.set_processing(&client_id, false).await;
                });
            }
            Err(_) => tracing::warn!(client_id, "turn dropped outside runtime, flag left set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(VoiceCatalog::default(), Duration::from_secs(7200))
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let sessions = manager();
        let session = sessions.create_or_update("c1", Some("Ethan")).await;
        assert_eq!(session.voice_type, "Ethan");
        assert!(!session.is_paused);

        sessions.set_paused("c1", true).await;
        sessions.set_processing("c1", true).await;

        let session = sessions.create_or_update("c1", Some("Bogus")).await;
        assert_eq!(session.voice_type, "Chelsie");
        assert!(!session.is_paused);
        assert!(!session.is_processing);
    }

    #[tokio::test]
    async fn test_unknown_session_flags() {
        let sessions = manager();
        assert!(!sessions.exists("nope").await);
        assert!(!sessions.set_paused("nope", true).await);
        assert!(sessions.toggle_paused("nope").await.is_none());
        assert_eq!(sessions.voice_type("nope").await, "Chelsie");
    }

    #[tokio::test]
    async fn test_toggle_paused() {
        let sessions = manager();
        sessions.create_or_update("c1", None).await;
        assert_eq!(sessions.toggle_paused("c1").await, Some(true));
        assert!(sessions.is_paused("c1").await);
        assert_eq!(sessions.toggle_paused("c1").await, Some(false));
    }

    #[tokio::test]
    async fn test_processing_claim_is_exclusive() {
        let sessions = manager();
        sessions.create_or_update("c1", None).await;
        assert!(sessions.try_begin_processing("c1").await);
        assert!(!sessions.try_begin_processing("c1").await);
        sessions.set_processing("c1", false).await;
        assert!(sessions.try_begin_processing("c1").await);
        assert!(!sessions.try_begin_processing("missing").await);
    }

    #[tokio::test]
    async fn test_dropped_turn_guard_clears_flag() {
        let sessions = manager();
        sessions.create_or_update("c1", None).await;

        let guard = sessions.begin_turn("c1").await.unwrap();
        assert!(sessions.begin_turn("c1").await.is_none());
        drop(guard);
        assert!(!sessions.is_processing("c1").await);

        // Contended lock falls back to a spawned release
        let guard = sessions.begin_turn("c1").await.unwrap();
        let reader = sessions.inner.read().await;
        drop(guard);
        drop(reader);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!sessions.is_processing("c1").await);

        let guard = sessions.begin_turn("c1").await.unwrap();
        guard.release().await;
        assert!(!sessions.is_processing("c1").await);
        assert!(sessions.begin_turn("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_set_voice_type_falls_back() {
        let sessions = manager();
        sessions.create_or_update("c1", None).await;
        assert_eq!(sessions.set_voice_type("c1", "Ethan").await, "Ethan");
        assert_eq!(sessions.voice_type("c1").await, "Ethan");
        assert_eq!(sessions.set_voice_type("c1", "Nope").await, "Chelsie");
    }

    #[tokio::test]
    async fn test_history_is_capped_and_deleted() {
        let sessions = manager();
        sessions.create_or_update("c1", None).await;
        for i in 0..MAX_HISTORY + 5 {
            sessions.add_history("c1", format!("turn {i}"), i % 2 == 0).await;
        }
        let history = sessions.history("c1").await;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].text, "turn 5");

        assert!(sessions.delete("c1").await);
        assert!(sessions.history("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let sessions = SessionManager::new(VoiceCatalog::default(), Duration::ZERO);
        sessions.create_or_update("c1", None).await;
        sessions.create_or_update("c2", None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(sessions.cleanup_expired().await, 2);
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active() {
        let sessions = manager();
        sessions.create_or_update("c1", None).await;
        assert_eq!(sessions.cleanup_expired().await, 0);
        assert!(sessions.get("c1").await.is_some());
    }
}

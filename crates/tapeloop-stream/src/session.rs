//! Registry of in-flight live sessions, keyed by content key.

use crate::tee::{SessionStatus, SinkState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tapeloop_cache::{WriteProgress, WriteState};
use tapeloop_core::ContentKey;
use tokio::sync::watch;

/// Counts readers tailing a live session's cache entry.
#[derive(Clone)]
pub struct Attachments {
    count: Arc<watch::Sender<usize>>,
}

impl Default for Attachments {
    fn default() -> Self {
        Self::new()
    }
}

impl Attachments {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Register a reader until the returned guard is dropped.
    pub fn attach(&self) -> AttachGuard {
        self.count.send_modify(|n| *n += 1);
        AttachGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }
}

pub struct AttachGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// A fetch in progress that later requests for the same key can join.
pub struct LiveSession {
    key: ContentKey,
    progress: watch::Receiver<WriteProgress>,
    attachments: Attachments,
    status: watch::Receiver<SessionStatus>,
    cache: watch::Receiver<SinkState>,
}

impl LiveSession {
    pub fn new(
        key: ContentKey,
        progress: watch::Receiver<WriteProgress>,
        attachments: Attachments,
        status: watch::Receiver<SessionStatus>,
        cache: watch::Receiver<SinkState>,
    ) -> Self {
        Self {
            key,
            progress,
            attachments,
            status,
            cache,
        }
    }

    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn progress(&self) -> watch::Receiver<WriteProgress> {
        self.progress.clone()
    }

    /// Bytes written to the cache entry so far.
    pub fn available(&self) -> u64 {
        self.progress.borrow().written
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    /// Active, with the cache entry still being written. Followers read
    /// that entry, so a session whose cache lane was dropped cannot be
    /// joined even while its live client is still being served.
    pub fn is_joinable(&self) -> bool {
        self.is_active()
            && *self.cache.borrow() == SinkState::Active
            && self.progress.borrow().state == WriteState::Writing
    }

    pub fn attach(&self) -> AttachGuard {
        self.attachments.attach()
    }

    pub fn followers(&self) -> usize {
        self.attachments.count()
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<ContentKey, Arc<LiveSession>>,
    /// Keys someone is starting a session for. The receiver closes once
    /// that slot is filled or dropped.
    pending: HashMap<ContentKey, watch::Receiver<()>>,
}

/// Result of [`SessionRegistry::claim`].
pub enum Claim {
    /// A joinable session exists for the key.
    Joined(Arc<LiveSession>),
    /// No joinable session. Other claims for the same key wait until the
    /// slot is filled or dropped; other keys are unaffected.
    Vacant(VacantSlot),
}

pub struct VacantSlot {
    key: ContentKey,
    registry: SessionRegistry,
    armed: bool,
    _done: watch::Sender<()>,
}

impl VacantSlot {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Publish `session` under this slot's key, replacing any session that
    /// is still running but no longer joinable.
    pub fn insert(mut self, session: Arc<LiveSession>) {
        let mut registry = self.registry.lock();
        registry.sessions.insert(self.key.clone(), session);
        registry.pending.remove(&self.key);
        self.armed = false;
    }
}

impl Drop for VacantSlot {
    fn drop(&mut self) {
        if self.armed {
            self.registry.lock().pending.remove(&self.key);
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find a joinable session for `key`, or reserve the key for a new one.
    pub async fn claim(&self, key: &ContentKey) -> Claim {
        loop {
            let mut pending = {
                let mut registry = self.lock();
                if let Some(session) = registry.sessions.get(key).filter(|s| s.is_joinable()) {
                    return Claim::Joined(session.clone());
                }
                let existing = registry.pending.get(key).cloned();
                match existing {
                    Some(pending) => pending,
                    None => {
                        let (done, pending) = watch::channel(());
                        registry.pending.insert(key.clone(), pending);
                        return Claim::Vacant(VacantSlot {
                            key: key.clone(),
                            registry: self.clone(),
                            armed: true,
                            _done: done,
                        });
                    }
                }
            };
            // Errors once the other slot is filled or dropped.
            let _ = pending.changed().await;
        }
    }

    /// Remove `session` if it is still the one registered under `key`.
    pub fn release(&self, key: &ContentKey, session: &Arc<LiveSession>) {
        let mut registry = self.lock();
        if registry
            .sessions
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            registry.sessions.remove(key);
        }
    }

    pub fn get(&self, key: &ContentKey) -> Option<Arc<LiveSession>> {
        self.lock().sessions.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

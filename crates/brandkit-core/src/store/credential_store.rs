use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, warn};

use super::backend::{MemoryBackend, SessionBackend, StoreError};
use crate::auth::Session;
use crate::subscription::Subscription;

/// Who caused a store change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Written by this context (login, renewal, logout)
    Local,
    /// Adopted from the backend, i.e. written by another context or a
    /// previous run
    Backend,
}

/// Delivered to `on_change` listeners after every store mutation.
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub session: Option<Arc<Session>>,
    pub generation: u64,
    pub source: ChangeSource,
}

impl StoreChange {
    pub fn is_cleared(&self) -> bool {
        self.session.is_none()
    }
}

type Listener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

#[derive(Default)]
struct Current {
    session: Option<Arc<Session>>,
    generation: u64,
}

/// Single source of truth for the current session.
///
/// Sessions are swapped whole behind an `Arc`, so a reader sees either the
/// complete previous session or the complete new one. Every mutation bumps
/// the generation counter and synchronously runs the registered listeners.
pub struct CredentialStore {
    current: RwLock<Current>,
    /// Serializes writers so listeners observe changes in generation order
    writer: ReentrantMutex<()>,
    listeners: Arc<Mutex<Listeners>>,
    backend: Arc<dyn SessionBackend>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            current: RwLock::new(Current::default()),
            writer: ReentrantMutex::new(()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            backend,
        }
    }

    /// Store backed by a private in-memory slot
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn get(&self) -> Option<Arc<Session>> {
        self.current.read().session.clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Session and generation read together
    pub fn snapshot(&self) -> (Option<Arc<Session>>, u64) {
        let current = self.current.read();
        (current.session.clone(), current.generation)
    }

    pub fn set(&self, session: Session) -> Arc<Session> {
        let _writer = self.writer.lock();
        let session = Arc::new(session);
        self.persist(Some(&session));
        self.apply(Some(session.clone()), ChangeSource::Local);
        session
    }

    pub fn clear(&self) {
        self.clear_local();
    }

    /// Write `session` only if nothing has changed since `generation`.
    ///
    /// Returns `None` when the store moved on (cleared, or replaced by
    /// someone else); the caller's result belongs to a superseded generation.
    pub fn replace_if(&self, generation: u64, session: Session) -> Option<Arc<Session>> {
        let _writer = self.writer.lock();
        let current = self.generation();
        if current != generation {
            debug!(expected = generation, current, "Discarding session write from superseded generation");
            return None;
        }
        Some(self.set(session))
    }

    /// Clear only if nothing has changed since `generation`.
    ///
    /// Returns the generation the clear produced. Listeners may already have
    /// written again by the time this returns, so the value can be older
    /// than [`generation()`](Self::generation).
    pub fn clear_if(&self, generation: u64) -> Option<u64> {
        let _writer = self.writer.lock();
        let current = self.generation();
        if current != generation {
            debug!(expected = generation, current, "Not clearing session changed by another writer");
            return None;
        }
        Some(self.clear_local())
    }

    /// Populate the store from the backend (startup restore)
    pub fn load(&self) -> Option<Arc<Session>> {
        self.reload();
        self.get()
    }

    /// Re-read the backend and adopt whatever it holds.
    ///
    /// Returns `true` if the in-memory session changed. Listeners see the
    /// change with [`ChangeSource::Backend`]. A backend that cannot be read
    /// leaves the current session in place; one that holds an unreadable
    /// document counts as empty.
    pub fn reload(&self) -> bool {
        let _writer = self.writer.lock();
        let persisted = match self.backend.load() {
            Ok(session) => session,
            Err(StoreError::Parse(e)) => {
                warn!(error = %e, "Stored session is unreadable; treating as signed out");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload session");
                return false;
            }
        };

        let unchanged = match (self.get(), &persisted) {
            (Some(current), Some(persisted)) => *current == *persisted,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return false;
        }

        self.apply(persisted.map(Arc::new), ChangeSource::Backend);
        true
    }

    /// Register a listener for every subsequent change.
    ///
    /// Listeners run synchronously on the writing task, after the new
    /// session is visible to `get`.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    fn clear_local(&self) -> u64 {
        let _writer = self.writer.lock();
        self.persist(None);
        self.apply(None, ChangeSource::Local)
    }

    fn persist(&self, session: Option<&Arc<Session>>) {
        let result = match session {
            Some(session) => self.backend.save(session),
            None => self.backend.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session change");
        }
    }

    fn apply(&self, session: Option<Arc<Session>>, source: ChangeSource) -> u64 {
        let change = {
            let mut current = self.current.write();
            current.generation += 1;
            current.session = session;
            StoreChange {
                session: current.session.clone(),
                generation: current.generation,
                source,
            }
        };
        debug!(
            generation = change.generation,
            cleared = change.is_cleared(),
            source = ?source,
            "Session changed"
        );

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&change);
        }
        change.generation
    }
}

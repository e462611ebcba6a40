use async_trait::async_trait;
use assess_core::model::{SessionId, SessionRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    /// The persisted bytes exist but do not form a valid record.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// True when the stored data is unreadable rather than unreachable.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageError::Serialization(_))
    }
}

pub(crate) fn encode_record(record: &SessionRecord) -> Result<String, StorageError> {
    serde_json::to_string(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode_record(raw: &str) -> Result<SessionRecord, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Durable persistence for the single session slot and per-problem drafts.
///
/// Writes must be visible to the next read on the same store. Implementations
/// have no behavior beyond storing and returning what they were given.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write `record` into the session slot, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn put_session(&self, record: &SessionRecord) -> Result<(), StorageError>;

    /// Read the session slot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the slot holds a malformed
    /// record, or other storage errors.
    async fn current_session(&self) -> Result<Option<SessionRecord>, StorageError>;

    /// Read the slot only if it holds the session `id`.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::current_session`].
    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self
            .current_session()
            .await?
            .filter(|record| record.session_id() == id))
    }

    /// Empty the slot if it holds the session `id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the slot cannot be cleared.
    async fn delete_session(&self, id: &SessionId) -> Result<(), StorageError>;

    /// Empty the slot unconditionally, even if its contents are unreadable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the slot cannot be cleared.
    async fn clear_session_slot(&self) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the draft cannot be stored.
    async fn put_draft(
        &self,
        session_id: &SessionId,
        index: usize,
        code: &str,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the draft cannot be read.
    async fn get_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the draft cannot be removed.
    async fn delete_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<(), StorageError>;

    /// Remove every draft belonging to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the drafts cannot be removed.
    async fn delete_drafts(&self, session_id: &SessionId) -> Result<(), StorageError>;

    /// Remove every draft whose session does not occupy the slot. An empty or
    /// unreadable slot owns no drafts.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the drafts cannot be removed.
    async fn delete_orphaned_drafts(&self) -> Result<(), StorageError>;
}

/// Simple in-memory store for testing and prototyping.
///
/// The slot keeps the serialized JSON, like a browser key/value store would,
/// so corrupt contents behave the same as in a durable backend.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    slot: Arc<Mutex<Option<String>>>,
    drafts: Arc<Mutex<HashMap<(SessionId, usize), String>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with arbitrary text.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn put_raw_session(&self, raw: impl Into<String>) -> Result<(), StorageError> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(raw.into());
        Ok(())
    }

    /// Number of drafts currently held, across all sessions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn draft_count(&self) -> Result<usize, StorageError> {
        let guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let encoded = encode_record(record)?;
        let mut guard = self
            .slot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(encoded);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<SessionRecord>, StorageError> {
        let guard = self
            .slot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.as_deref().map(decode_record).transpose()
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StorageError> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let matches = guard
            .as_deref()
            .and_then(|raw| decode_record(raw).ok())
            .is_some_and(|record| record.session_id() == id);
        if matches {
            *guard = None;
        }
        Ok(())
    }

    async fn clear_session_slot(&self) -> Result<(), StorageError> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = None;
        Ok(())
    }

    async fn put_draft(
        &self,
        session_id: &SessionId,
        index: usize,
        code: &str,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((session_id.clone(), index), code.to_owned());
        Ok(())
    }

    async fn get_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<Option<String>, StorageError> {
        let guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(session_id.clone(), index)).cloned())
    }

    async fn delete_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(session_id.clone(), index));
        Ok(())
    }

    async fn delete_drafts(&self, session_id: &SessionId) -> Result<(), StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.retain(|(owner, _), _| owner != session_id);
        Ok(())
    }

    async fn delete_orphaned_drafts(&self) -> Result<(), StorageError> {
        let owner = {
            let guard = self
                .slot
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            guard
                .as_deref()
                .and_then(|raw| decode_record(raw).ok())
                .map(|record| record.session_id().clone())
        };
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.retain(|(session_id, _), _| owner.as_ref() == Some(session_id));
        Ok(())
    }
}

/// Wraps the session store behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        Self { sessions }
    }
}

//! Session cache keys, per-key serialization and an in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use nlsql_core::{FlowError, Result, SessionStore};

const SUFFIX_METADATA: &str = "-metadata";
const SUFFIX_LAST_QA: &str = "-last-qa";
const SUFFIX_MASTER_VALUES: &str = "-master-values";

/// Key of the rendered database context cached for a session.
pub fn metadata_key(session_id: &str) -> String {
    format!("{}{}", session_id, SUFFIX_METADATA)
}

/// Key of the last question and answer of a session.
pub fn last_qa_key(session_id: &str) -> String {
    format!("{}{}", session_id, SUFFIX_LAST_QA)
}

/// Key of the master dimension values shared by every session on a database.
pub fn master_values_key(db_id: &str) -> String {
    format!("{}{}", db_id, SUFFIX_MASTER_VALUES)
}

// =============================================================================
// KeyedLocks
// =============================================================================

/// One async mutex per key, created on first use.
///
/// Holding the guard for a key serializes every read-modify-write on it
/// within this process. Entries whose lock nobody holds or waits on are
/// dropped on the next acquisition.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| FlowError::Internal(format!("key lock table poisoned: {}", e)))?;
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        Ok(lock.lock_owned().await)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// MemorySessionStore
// =============================================================================

/// Process-local [`SessionStore`], for tests and single-node deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every key.
    pub fn clear(&self) -> Result<()> {
        self.data
            .lock()
            .map_err(|e| FlowError::Internal(format!("session store lock poisoned: {}", e)))?
            .clear();
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data
            .lock()
            .map(|d| d.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session_data(&self, key: &str) -> Result<String> {
        let data = self
            .data
            .lock()
            .map_err(|e| FlowError::Internal(format!("session store lock poisoned: {}", e)))?;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn update_session_data(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .lock()
            .map_err(|e| FlowError::Internal(format!("session store lock poisoned: {}", e)))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_session_data(&self, key: &str) -> Result<()> {
        self.data
            .lock()
            .map_err(|e| FlowError::Internal(format!("session store lock poisoned: {}", e)))?
            .remove(key);
        Ok(())
    }
}

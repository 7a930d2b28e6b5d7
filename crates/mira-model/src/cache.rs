// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Substring that marks a cache key as memory-scoped.  Memory mutations
/// invalidate every key containing it.
pub const MEMORY_CACHE_MARKER: &str = "_memory_cache";

/// Opaque identifier for a reusable prompt-prefix state.
///
/// Derived deterministically from the model identifier, a purpose label
/// and (for sub-agent caches) the tool name, so keys are stable across
/// process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(model: &str, purpose: &str, tool: Option<&str>) -> Self {
        let model: String = model
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let key = match tool {
            Some(t) => format!("{model}_{purpose}_{t}"),
            None => format!("{model}_{purpose}"),
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_memory_scoped(&self) -> bool {
        self.0.contains(MEMORY_CACHE_MARKER)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Freshly allocated; the prefix has not been fed through the model yet
    Fresh,
    /// The prefix state is populated and reusable
    Initialized,
}

/// One prompt-state entry.  The engine shares the handle during a
/// generation; the registry owns the lifecycle.
pub struct PromptCache {
    key: CacheKey,
    state: Mutex<CacheState>,
}

impl PromptCache {
    fn new(key: CacheKey, state: CacheState) -> Self {
        Self {
            key,
            state: Mutex::new(state),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn state(&self) -> CacheState {
        *self.state.lock().unwrap()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == CacheState::Initialized
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A key is exclusively held by the generation it feeds; concurrent
    /// acquisition is rejected rather than serialized.
    #[error("cache key `{0}` is already in use")]
    Busy(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialized form of a persisted cache entry (`<key>.promptcache`).
#[derive(Serialize, Deserialize)]
struct PersistedCache {
    key: String,
    state: CacheState,
    saved_at: chrono::DateTime<chrono::Utc>,
}

struct Entry {
    cache: Arc<PromptCache>,
    held: bool,
}

/// Keyed prompt-state store with an init/load/save/invalidate lifecycle.
///
/// States: absent → present (fresh) → present (initialized) → persisted.
/// One file per key under the registry directory keeps keys stable
/// across restarts.
pub struct CacheRegistry {
    dir: PathBuf,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl CacheRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn file_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.promptcache"))
    }

    /// Acquire the cache for `key`, loading the persisted entry from disk
    /// when present, otherwise allocating a fresh one.  The returned guard
    /// holds the key exclusively until dropped.
    pub fn get_cache(&self, key: &CacheKey) -> Result<CacheGuard, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key.as_str()) {
            if entry.held {
                return Err(CacheError::Busy(key.to_string()));
            }
            entry.held = true;
            return Ok(CacheGuard {
                entries: Arc::clone(&self.entries),
                cache: Arc::clone(&entry.cache),
            });
        }

        let state = self.load_persisted_state(key);
        let cache = Arc::new(PromptCache::new(key.clone(), state));
        entries.insert(
            key.as_str().to_string(),
            Entry {
                cache: Arc::clone(&cache),
                held: true,
            },
        );
        Ok(CacheGuard {
            entries: Arc::clone(&self.entries),
            cache,
        })
    }

    fn load_persisted_state(&self, key: &CacheKey) -> CacheState {
        let path = self.file_path(key);
        if !path.is_file() {
            return CacheState::Fresh;
        }
        match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str::<PersistedCache>(&text).map_err(Into::into))
        {
            Ok(persisted) => {
                debug!(%key, "loaded persisted prompt cache");
                persisted.state
            }
            Err(e) => {
                warn!(%key, error = %e, "unreadable persisted cache, starting fresh");
                CacheState::Fresh
            }
        }
    }

    /// Promote the entry to the initialized state.  No-op for unknown keys.
    pub fn mark_initialized(&self, key: &CacheKey) {
        let entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key.as_str()) {
            *entry.cache.state.lock().unwrap() = CacheState::Initialized;
        }
    }

    /// Persist the entry to disk (one file per key).
    pub fn save_cache(&self, key: &CacheKey) -> Result<(), CacheError> {
        let state = {
            let entries = self.entries.lock().unwrap();
            match entries.get(key.as_str()) {
                Some(entry) => entry.cache.state(),
                None => return Ok(()),
            }
        };
        let persisted = PersistedCache {
            key: key.to_string(),
            state,
            saved_at: chrono::Utc::now(),
        };
        let body = serde_json::to_string(&persisted).expect("cache metadata is always serializable");
        std::fs::write(self.file_path(key), body)?;
        debug!(%key, "saved prompt cache");
        Ok(())
    }

    /// Remove every memory-scoped key (name contains `_memory_cache`) from
    /// memory and disk.  Called whenever the memory store is mutated, so
    /// subsequent acquisitions see a fresh, non-initialized cache.
    pub fn invalidate_memory_caches(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| !key.contains(MEMORY_CACHE_MARKER));
        drop(entries);

        if let Ok(dir) = std::fs::read_dir(&self.dir) {
            for file in dir.flatten() {
                let name = file.file_name();
                if name.to_string_lossy().contains(MEMORY_CACHE_MARKER) {
                    if let Err(e) = std::fs::remove_file(file.path()) {
                        warn!(file = %file.path().display(), error = %e, "failed to remove invalidated cache");
                    }
                }
            }
        }
        debug!("invalidated memory-scoped prompt caches");
    }

    /// Drop the entry unconditionally, optionally deleting its file.
    pub fn release_cache(&self, key: &CacheKey, delete_file: bool) {
        self.entries.lock().unwrap().remove(key.as_str());
        if delete_file {
            match std::fs::remove_file(self.file_path(key)) {
                Ok(()) => debug!(%key, "released prompt cache and deleted file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(%key, error = %e, "failed to delete released cache file"),
            }
        }
    }

}

/// Exclusive hold on a registry key for the duration of one generation.
/// Dropping the guard returns the key to the registry.
pub struct CacheGuard {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    cache: Arc<PromptCache>,
}

impl CacheGuard {
    pub fn key(&self) -> &CacheKey {
        self.cache.key()
    }

    /// Share the cache handle with the engine for one generation.
    pub fn cache(&self) -> Arc<PromptCache> {
        Arc::clone(&self.cache)
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        // The entry may already be gone if the key was released outright.
        if let Some(entry) = self.entries.lock().unwrap().get_mut(self.cache.key().as_str()) {
            entry.held = false;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

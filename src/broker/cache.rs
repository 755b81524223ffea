//! Process-scoped transfer caches.
//!
//! Both caches are append-only. An exported buffer must stay alive until
//! some peer has fetched it, and no completion signal exists in the
//! protocol, so the export cache pins entries for the life of the process.
//! The import cache keeps every materialized transfer so that a repeated
//! rebuild of the same transfer costs one cache lookup instead of a second
//! allocation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::buffer::DeviceBuffer;
use crate::device::IpcMemHandle;
use crate::error::{CudexError, Result};

/// A buffer offered for pickup, plus the IPC handle minted for it once the
/// first handle request arrives.
pub(crate) struct ExportEntry {
    buffer: DeviceBuffer,
    handle: Option<IpcMemHandle>,
}

/// Buffers this worker has offered to peers, keyed by export identity.
#[derive(Default)]
pub struct ExportCache {
    entries: Mutex<HashMap<u64, ExportEntry>>,
}

impl ExportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `buffer` under `key`. Re-exporting the same identity keeps the
    /// original entry, and with it any handle already minted.
    pub(crate) fn insert(&self, key: u64, buffer: DeviceBuffer) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CudexError::LockPoisoned("export cache"))?;
        entries
            .entry(key)
            .or_insert(ExportEntry { buffer, handle: None });
        Ok(())
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(&key))
            .unwrap_or(false)
    }

    /// Number of pinned exports, for logging and accounting.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pinned buffer for `key`. Shares the allocation, cheap to clone.
    pub(crate) fn buffer(&self, key: u64) -> Result<DeviceBuffer> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CudexError::LockPoisoned("export cache"))?;
        entries
            .get(&key)
            .map(|entry| entry.buffer.clone())
            .ok_or(CudexError::KeyNotExported { key })
    }

    /// The handle already minted for `key`, if any.
    pub(crate) fn cached_handle(&self, key: u64) -> Result<Option<IpcMemHandle>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CudexError::LockPoisoned("export cache"))?;
        match entries.get(&key) {
            Some(entry) => Ok(entry.handle.clone()),
            None => Err(CudexError::KeyNotExported { key }),
        }
    }

    /// Record the handle minted for `key` so later fetches reuse it.
    pub(crate) fn store_handle(&self, key: u64, handle: IpcMemHandle) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CudexError::LockPoisoned("export cache"))?;
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.handle.get_or_insert(handle);
                Ok(())
            }
            None => Err(CudexError::KeyNotExported { key }),
        }
    }
}

/// Transfers this worker has already materialized, keyed by the identity of
/// the producing context and export key.
#[derive(Default)]
pub struct ImportCache {
    entries: Mutex<HashMap<u64, DeviceBuffer>>,
}

impl ImportCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: u64) -> Result<Option<DeviceBuffer>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CudexError::LockPoisoned("import cache"))?;
        Ok(entries.get(&key).cloned())
    }

    /// Record a materialized transfer. First insert wins; a concurrent
    /// duplicate materialization keeps the original mapping so every later
    /// rebuild sees one buffer.
    pub(crate) fn insert(&self, key: u64, buffer: DeviceBuffer) -> Result<DeviceBuffer> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CudexError::LockPoisoned("import cache"))?;
        Ok(entries.entry(key).or_insert(buffer).clone())
    }

    /// Number of materialized imports, for logging and accounting.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

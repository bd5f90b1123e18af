//! Store abstraction the checkpoint layer writes through, plus the string
//! key layout shared by every implementation.
//!
//! Keys are flat byte strings with ASCII prefixes so any ordered key-value
//! store can serve: `meta:current_window`, `state:<window_id>`, and
//! `reservoir:<window_id>:<fingerprint_hex>`.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use weir_core::Result;

/// Pointer record naming the latest checkpointed window.
pub const CURRENT_WINDOW_KEY: &[u8] = b"meta:current_window";

/// Prefix of all window state records.
pub const STATE_PREFIX: &[u8] = b"state:";

/// Key of the state record for one window.
pub fn state_key(window_id: u64) -> Vec<u8> {
    format!("state:{window_id}").into_bytes()
}

/// Key of one checkpointed reservoir span.
pub fn span_key(window_id: u64, fingerprint: u64) -> Vec<u8> {
    format!("reservoir:{window_id}:{fingerprint:016x}").into_bytes()
}

/// Prefix covering every reservoir span of one window. The trailing colon
/// keeps window 1 from matching window 10.
pub fn span_prefix(window_id: u64) -> Vec<u8> {
    format!("reservoir:{window_id}:").into_bytes()
}

/// Parse the window id out of a state record key.
pub fn window_id_from_state_key(key: &[u8]) -> Option<u64> {
    let suffix = key.strip_prefix(STATE_PREFIX)?;
    std::str::from_utf8(suffix).ok()?.parse().ok()
}

/// Minimal durable key-value capability the checkpoint layer depends on.
/// `put` must be durable once it returns.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Write several records in one transaction.
    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All records whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Remove all records under a prefix; returns how many went away.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let mut removed = 0;
        for (key, _) in self.scan_prefix(prefix)? {
            self.delete(&key)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Reclaim space; what this does is up to the store.
    fn compact(&self) -> Result<()>;

    /// Current on-disk footprint in bytes.
    fn size_on_disk(&self) -> Result<u64>;

    /// Push any buffered writes down before shutdown. Stores with durable
    /// `put` have nothing to do.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Ordered in-memory store. Backs unit tests and hosts that want
/// checkpointing semantics without a disk footprint.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.records.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut records = self.records.lock();
        for (key, value) in entries {
            records.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let records = self.records.lock();
        Ok(records
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn size_on_disk(&self) -> Result<u64> {
        let records = self.records.lock();
        Ok(records.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
    }
}

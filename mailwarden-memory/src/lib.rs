//! # Mailwarden Memory
//!
//! Durable, append-friendly blob store rooted at a data directory. Agents and
//! the orchestrator persist their observable history here:
//!
//! - `agents/<isp>/<agent>/state.json` — last persisted agent state
//! - `agents/<isp>/<agent>/decisions.jsonl` — decision log
//! - `agents/<isp>/<agent>/signals.jsonl` — snapshot log
//! - `agents/<isp>/<agent>/convictions.jsonl` — conviction log
//! - `agents/<isp>/<agent>/incidents.json` — incident reports
//! - `global/orchestrator/state.json` — orchestrator state
//!
//! Line appends are buffered and flushed on a size or age trigger so the hot
//! path never waits on the filesystem; whole-blob writes are atomic
//! (tmp + rename). Callers treat persistence failures as log-and-continue.

use mailwarden_core::CancelToken;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for memory-store operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors raised by the blob memory store.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// How many buffered lines force a flush.
const FLUSH_LINES: usize = 50;
/// How old the oldest buffered line may get before a flush.
const FLUSH_AGE: Duration = Duration::from_secs(2);

struct PendingAppends {
    lines: HashMap<String, Vec<String>>,
    oldest: Option<Instant>,
    total: usize,
}

/// Filesystem-rooted blob memory store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

struct MemoryStoreInner {
    root: PathBuf,
    pending: Mutex<PendingAppends>,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            inner: Arc::new(MemoryStoreInner {
                root,
                pending: Mutex::new(PendingAppends {
                    lines: HashMap::new(),
                    oldest: None,
                    total: 0,
                }),
            }),
        })
    }

    /// Key for a per-agent blob, e.g. `agents/gmail/throttle/decisions.jsonl`.
    pub fn agent_key(isp: &str, agent: &str, file: &str) -> String {
        format!("agents/{}/{}/{}", isp, agent, file)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(MemoryError::InvalidKey(key.to_string()));
        }
        Ok(self.inner.root.join(key))
    }

    /// Buffer one JSONL line for `key`. Flushes when the buffer is large or
    /// old enough.
    pub fn append_line<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)?;
        let should_flush = {
            let mut pending = self.inner.pending.lock();
            pending.lines.entry(key.to_string()).or_default().push(line);
            pending.total += 1;
            pending.oldest.get_or_insert_with(Instant::now);
            pending.total >= FLUSH_LINES
                || pending.oldest.map(|t| t.elapsed() >= FLUSH_AGE).unwrap_or(false)
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Append one JSONL line immediately, bypassing the buffer. Used for
    /// incident reports, which must hit disk before the decision goes out.
    pub fn append_line_now<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)?;
        self.append_raw(key, &[line])
    }

    /// Flush all buffered appends to disk.
    pub fn flush(&self) -> Result<()> {
        let drained = {
            let mut pending = self.inner.pending.lock();
            if pending.lines.is_empty() {
                return Ok(());
            }
            pending.oldest = None;
            pending.total = 0;
            std::mem::take(&mut pending.lines)
        };
        for (key, lines) in drained {
            if let Err(err) = self.append_raw(&key, &lines) {
                warn!(key = %key, error = %err, "dropping buffered appends");
            }
        }
        Ok(())
    }

    fn append_raw(&self, key: &str, lines: &[String]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        for line in lines {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    /// Atomically replace the blob at `key`.
    pub fn write_blob<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read the blob at `key`; `None` when absent.
    pub fn read_blob<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read all JSONL lines for `key`, including any still buffered. A
    /// missing file yields an empty vec.
    pub fn read_lines(&self, key: &str) -> Result<Vec<String>> {
        let path = self.path_for(key)?;
        let mut lines: Vec<String> = match fs::read_to_string(&path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let pending = self.inner.pending.lock();
        if let Some(buffered) = pending.lines.get(key) {
            lines.extend(buffered.iter().cloned());
        }
        Ok(lines)
    }

    /// Background flusher draining age-triggered buffers.
    pub fn spawn_flusher(&self, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_AGE);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(err) = store.flush() {
                            warn!(error = %err, "final memory flush failed");
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = store.flush() {
                            warn!(error = %err, "memory flush failed");
                        }
                    }
                }
            }
            debug!("memory flusher stopped");
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Entry {
        n: u32,
    }

    #[test]
    fn append_and_read_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        let key = MemoryStore::agent_key("gmail", "throttle", "convictions.jsonl");

        store.append_line(&key, &Entry { n: 1 }).unwrap();
        store.append_line(&key, &Entry { n: 2 }).unwrap();

        // Buffered lines are visible before a flush.
        assert_eq!(store.read_lines(&key).unwrap().len(), 2);

        store.flush().unwrap();
        let lines = store.read_lines(&key).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(serde_json::from_str::<Entry>(&lines[0]).unwrap(), Entry { n: 1 });
    }

    #[test]
    fn blob_write_is_atomic_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();

        store.write_blob("global/orchestrator/state.json", &Entry { n: 1 }).unwrap();
        store.write_blob("global/orchestrator/state.json", &Entry { n: 2 }).unwrap();

        let read: Option<Entry> = store.read_blob("global/orchestrator/state.json").unwrap();
        assert_eq!(read, Some(Entry { n: 2 }));
        assert!(!dir.path().join("global/orchestrator/state.tmp").exists());
    }

    #[test]
    fn missing_blob_and_log_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        assert!(store.read_blob::<Entry>("agents/gmail/pool/state.json").unwrap().is_none());
        assert!(store.read_lines("agents/gmail/pool/decisions.jsonl").unwrap().is_empty());
    }

    #[test]
    fn rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        assert!(store.read_lines("../escape.jsonl").is_err());
    }

    #[test]
    fn size_trigger_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        for n in 0..FLUSH_LINES as u32 {
            store.append_line("agents/gmail/pool/decisions.jsonl", &Entry { n }).unwrap();
        }
        // The 50th append crossed the threshold; the file must exist on disk.
        let on_disk = std::fs::read_to_string(dir.path().join("agents/gmail/pool/decisions.jsonl")).unwrap();
        assert_eq!(on_disk.lines().count(), FLUSH_LINES);
    }
}

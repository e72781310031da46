//! Raw key-value backends
//!
//! File layout for [`FileStore`]:
//! - `quell.log`: `QUELLKV1\n` header, then one JSON operation per line
//!
//! ```text
//! QUELLKV1
//! {"op":"set","key":"Country--2","value":"{\"fields\":{...},...}"}
//! {"op":"del","key":"Country--2"}
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Magic header for Quell log files
pub const QUELL_MAGIC: &[u8] = b"QUELLKV1\n";

const LOG_FILE: &str = "quell.log";

/// The flat key-value capability the cache engine writes into
///
/// Values are opaque strings; every call is atomic on its own, but callers get
/// no transaction spanning several calls.
pub trait KvStore: Send + Sync {
    /// Read the raw value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`; returns whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Snapshot of every key currently stored
    fn keys(&self) -> Result<Vec<String>>;

    /// Remove everything
    fn clear(&self) -> Result<()>;

    /// Number of stored keys
    fn len(&self) -> usize;

    /// Check if the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session-scoped store: lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String, RandomState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogRecord {
    Set { key: String, value: String },
    Del { key: String },
}

/// Local, persisted store: an append-only operation log replayed on open
pub struct FileStore {
    /// Path to the store directory
    path: PathBuf,

    /// Log file handle
    log: Mutex<File>,

    /// Replayed state
    entries: RwLock<HashMap<String, String, RandomState>>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl FileStore {
    /// Open or create a store in the given directory
    ///
    /// # Arguments
    /// * `path` - Directory for the store files
    ///
    /// # Returns
    /// * `Result<FileStore>` - Store handle with the log replayed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let log_path = path.join(LOG_FILE);
        let (log, entries) = if log_path.exists() {
            Self::open_existing(&log_path)?
        } else {
            Self::create_new(&log_path)?
        };

        info!("Opened store at {} ({} keys)", path.display(), entries.len());

        Ok(FileStore {
            path: path.to_path_buf(),
            log: Mutex::new(log),
            entries: RwLock::new(entries),
            closed: RwLock::new(false),
        })
    }

    fn open_existing(log_path: &Path) -> Result<(File, HashMap<String, String, RandomState>)> {
        let mut log = OpenOptions::new().read(true).append(true).open(log_path)?;

        let mut raw = Vec::new();
        log.read_to_end(&mut raw)?;

        if !raw.starts_with(QUELL_MAGIC) {
            return Err(Error::Parse("Invalid Quell log header".to_string()));
        }

        let body = String::from_utf8_lossy(&raw[QUELL_MAGIC.len()..]);
        let mut entries = HashMap::with_hasher(RandomState::new());
        for (lineno, line) in body.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(LogRecord::Set { key, value }) => {
                    entries.insert(key, value);
                }
                Ok(LogRecord::Del { key }) => {
                    entries.remove(&key);
                }
                Err(e) => {
                    // A torn final write is expected after a crash
                    warn!("Skipping unreadable log line {}: {}", lineno + 2, e);
                }
            }
        }

        Ok((log, entries))
    }

    fn create_new(log_path: &Path) -> Result<(File, HashMap<String, String, RandomState>)> {
        let mut log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(log_path)?;
        log.write_all(QUELL_MAGIC)?;

        Ok((log, HashMap::with_hasher(RandomState::new())))
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.log.lock().write_all(&line)?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compact the log to the live key set and fsync it
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        let entries = self.entries.read();
        let log_path = self.path.join(LOG_FILE);
        let tmp_path = self.path.join(format!("{}.tmp", LOG_FILE));

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(QUELL_MAGIC)?;
            for (key, value) in entries.iter() {
                let mut line = serde_json::to_vec(&LogRecord::Set {
                    key: key.clone(),
                    value: value.clone(),
                })?;
                line.push(b'\n');
                tmp.write_all(&line)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &log_path)?;

        debug!("Compacted store log to {} keys", entries.len());
        *self.closed.write() = true;

        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.ensure_open()?;
        self.append(&LogRecord::Set {
            key: key.to_string(),
            value: value.clone(),
        })?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let existed = self.entries.write().remove(key).is_some();
        if existed {
            self.append(&LogRecord::Del {
                key: key.to_string(),
            })?;
        }
        Ok(existed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        let mut entries = self.entries.write();
        let mut log = self.log.lock();
        log.set_len(0)?;
        log.write_all(QUELL_MAGIC)?;
        entries.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

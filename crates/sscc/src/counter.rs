//! Durable per-class sequence counters.
//!
//! Every allocation is one load → increment → persist cycle executed under
//! an in-process mutex and the backend's cross-process lock. The JSON file
//! backend writes a `.tmp` sibling and renames it over the state file, so a
//! reader sees either the old state or the new one, never a torn write.

use std::fmt;
use std::fs::{self, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const DEFAULT_YEAR_PREFIX: &str = "26";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(10);

/// Identifier class. Each class owns one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitClass {
    /// Shipping box (UE).
    Box,
    /// Pallet (UX).
    Pallet,
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Box => write!(f, "box"),
            Self::Pallet => write!(f, "pallet"),
        }
    }
}

/// Persisted counter record. Missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterState {
    pub arp_id: String,
    pub year_prefix: String,
    #[serde(rename = "UE")]
    pub sequence_box: u64,
    #[serde(rename = "UX")]
    pub sequence_pallet: u64,
}

impl Default for CounterState {
    fn default() -> Self {
        Self {
            arp_id: String::new(),
            year_prefix: DEFAULT_YEAR_PREFIX.to_string(),
            sequence_box: 0,
            sequence_pallet: 0,
        }
    }
}

impl CounterState {
    pub fn value(&self, class: UnitClass) -> u64 {
        match class {
            UnitClass::Box => self.sequence_box,
            UnitClass::Pallet => self.sequence_pallet,
        }
    }

    fn increment(&mut self, class: UnitClass) -> Result<u64, StoreError> {
        let slot = match class {
            UnitClass::Box => &mut self.sequence_box,
            UnitClass::Pallet => &mut self.sequence_pallet,
        };
        *slot = slot.checked_add(1).ok_or(StoreError::CounterOverflow(class))?;
        Ok(*slot)
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Where counter state lives. `lock` must exclude every other holder of the
/// same state, including other processes, until the guard is dropped.
pub trait StateBackend: Send + Sync {
    type Guard;

    fn lock(&self) -> Result<Self::Guard, StoreError>;
    fn load(&self) -> Result<Option<CounterState>, StoreError>;
    fn persist(&self, state: &CounterState) -> Result<(), StoreError>;
}

/// JSON state file. Cross-process exclusion is an OS advisory lock on a
/// sibling `.lock` file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
    lock_timeout: Duration,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock_timeout: DEFAULT_LOCK_TIMEOUT }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, ".lock")
    }

    fn tmp_path(&self) -> PathBuf {
        sibling(&self.path, ".tmp")
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))
            }
            _ => Ok(()),
        }
    }
}

/// Exclusive advisory lock on the `.lock` file. The OS drops it when the
/// handle closes, including when the owning process dies.
#[derive(Debug)]
pub struct FileLock {
    file: fs::File,
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("failed to release counter lock {}: {e}", self.path.display());
        }
    }
}

impl StateBackend for JsonFileBackend {
    type Guard = FileLock;

    fn lock(&self) -> Result<FileLock, StoreError> {
        self.ensure_parent()?;
        let lock_path = self.lock_path();
        // The lock file is persistent; only the lock on it is transient
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(FileLock { file, path: lock_path }),
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::LockTimeout { path: lock_path });
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(TryLockError::Error(e)) => return Err(StoreError::io(&lock_path, e)),
            }
        }
    }

    fn load(&self) -> Result<Option<CounterState>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        serde_json::from_str(&text).map(Some).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn persist(&self, state: &CounterState) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::io(&self.path, e))?;

        // Atomic: write .tmp, flush to disk, then rename over the state file
        let tmp = self.tmp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }
}

/// In-memory backend. Clones share storage, so dropping a store and building
/// a new one from a clone behaves like a process restart. Clones also share
/// one lock, so stores built from clones exclude each other.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<Option<CounterState>>>,
    gate: Arc<Gate>,
}

#[derive(Debug, Default)]
struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: CounterState) -> Self {
        Self { state: Arc::new(Mutex::new(Some(state))), gate: Arc::default() }
    }

    pub fn snapshot(&self) -> Option<CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Holds the shared gate of a [`MemoryBackend`] until dropped.
#[derive(Debug)]
pub struct MemoryLock {
    gate: Arc<Gate>,
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        *self.gate.held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.gate.released.notify_one();
    }
}

impl StateBackend for MemoryBackend {
    type Guard = MemoryLock;

    fn lock(&self) -> Result<MemoryLock, StoreError> {
        let mut held = self.gate.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self.gate.released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        Ok(MemoryLock { gate: Arc::clone(&self.gate) })
    }

    fn load(&self) -> Result<Option<CounterState>, StoreError> {
        Ok(self.snapshot())
    }

    fn persist(&self, state: &CounterState) -> Result<(), StoreError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Counter store over an injected backend. Share it behind an `Arc`.
#[derive(Debug)]
pub struct CounterStore<B: StateBackend> {
    backend: B,
    serial: Mutex<()>,
}

impl<B: StateBackend> CounterStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, serial: Mutex::new(()) }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current state, seeding and persisting the default on first access.
    pub fn state(&self) -> Result<CounterState, StoreError> {
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self.backend.lock()?;
        self.load_or_seed()
    }

    /// Increment `class`, persist, and return the new value.
    pub fn next_value(&self, class: UnitClass) -> Result<u64, StoreError> {
        self.allocate(class).map(|(value, _)| value)
    }

    /// Like [`next_value`](Self::next_value), also returning the state as persisted.
    pub fn allocate(&self, class: UnitClass) -> Result<(u64, CounterState), StoreError> {
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self.backend.lock()?;

        let mut state = self.load_or_seed()?;
        let value = state.increment(class)?;
        self.backend.persist(&state)?;

        log::debug!("allocated {class} sequence {value}");
        Ok((value, state))
    }

    fn load_or_seed(&self) -> Result<CounterState, StoreError> {
        match self.backend.load()? {
            Some(state) => Ok(state),
            None => {
                let state = CounterState::default();
                self.backend.persist(&state)?;
                log::info!("seeded counter state with defaults");
                Ok(state)
            }
        }
    }
}

/// `<data dir>/despatch/sscc_state.json`, or a relative path when no data dir exists.
pub fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("despatch")
        .join("sscc_state.json")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

// engine/mod.rs
// The LSM Engine: the heart of the write/read path. Owns one WAL, one active
// + optional flushing memtable, an ordered SSTable list (oldest first), a
// read-through cache, and a bounded background worker pool that runs flush
// and compaction jobs. Concurrency shape -- `Arc<RwLock<..>>` around shared
// state, lock-free-during-I/O compaction swaps -- mirrors the chosen
// lineage's storage-sharing pattern generalized from a single mmap'd file to
// a real multi-SSTable LSM.

mod compaction;
mod flush;
mod recovery;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::cache::{CacheStats, ReadThroughCache};
use crate::config::Config;
use crate::error::Result;
use crate::memtable::{MemValue, Memtable};
use crate::sstable::SsTable;
use crate::wal::{WalOp, WriteAheadLog};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared state between the `LsmEngine` handle and its background workers.
pub(crate) struct MemState {
    pub active: Memtable,
    pub flushing: Option<Memtable>,
    pub flush_in_progress: bool,
}

pub(crate) struct EngineState {
    pub data_dir: PathBuf,
    pub config: Config,
    pub wal: WriteAheadLog,
    pub mem: Mutex<MemState>,
    pub mem_cv: Condvar,
    pub sstables: RwLock<Vec<Arc<SsTable>>>,
    pub cache: ReadThroughCache,
    pub generation: AtomicU64,
    pub flush_count: AtomicU64,
    pub compaction_count: AtomicU64,
}

#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub active_memtable_bytes: usize,
    pub active_memtable_len: usize,
    pub flush_in_progress: bool,
    pub flushing_memtable_len: usize,
    pub sstable_count: usize,
    pub total_keys_estimate: usize,
    pub flush_count: u64,
    pub compaction_count: u64,
    pub cache: CacheStats,
}

/// Bounded (size-2, per the design) pool that runs flush and compaction
/// jobs off the caller thread.
struct WorkerPool {
    sender: crossbeam::channel::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::unbounded::<Job>();
        let workers = (0..size)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("ironbase-worker-{i}"))
                    .spawn(move || {
                        for job in receiver {
                            job();
                        }
                    })
                    .expect("failed to spawn engine worker thread")
            })
            .collect();
        WorkerPool { sender, workers }
    }

    fn submit(&self, job: Job) {
        // The channel only closes once every sender (including this one) is
        // dropped, so this send cannot fail while the pool is alive.
        let _ = self.sender.send(job);
    }

    fn shutdown(self) {
        drop(self.sender);
        for w in self.workers {
            let _ = w.join();
        }
    }
}

/// Owns the WAL, dual memtables, SSTable list, cache, and background
/// flush/compaction workers. Exposes `put`/`get`/`delete`/`range_scan`/
/// `put_batch` per §4.5.1.
pub struct LsmEngine {
    state: Arc<EngineState>,
    pool: Mutex<Option<WorkerPool>>,
    compaction_stop: Arc<AtomicBool>,
    compaction_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LsmEngine {
    /// Open (or create) the engine rooted at `data_dir`: loads existing
    /// SSTables, replays the WAL into a fresh active memtable, and starts
    /// the background compaction loop and worker pool.
    pub fn open(data_dir: impl Into<PathBuf>, config: Config) -> Result<Self> {
        recovery::open(data_dir.into(), config)
    }

    /// Root directory this engine persists into, used by callers (e.g. the
    /// vector index) that keep their own sidecar files alongside it.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.state.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.state.wal.append(WalOp::Put, key.to_vec(), value.to_vec())?;
        let full = {
            let mut mem = self.state.mem.lock();
            mem.active.put(key.to_vec(), value.to_vec());
            mem.active.approx_size_bytes() >= self.state.config.memtable_size_threshold
        };
        self.state.cache.put(key.to_vec(), value.to_vec());
        if full {
            self.trigger_flush();
        }
        Ok(())
    }

    /// All records share one WAL group-commit batch and one memtable-lock
    /// acquisition.
    pub fn put_batch(&self, items: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (k, v) in items {
            self.state.wal.append(WalOp::Put, k.clone(), v.clone())?;
        }
        self.state.wal.sync()?;
        let full = {
            let mut mem = self.state.mem.lock();
            for (k, v) in items {
                mem.active.put(k.clone(), v.clone());
            }
            mem.active.approx_size_bytes() >= self.state.config.memtable_size_threshold
        };
        for (k, v) in items {
            self.state.cache.put(k.clone(), v.clone());
        }
        if full {
            self.trigger_flush();
        }
        Ok(())
    }

    /// Search order: active memtable -> flushing memtable -> cache ->
    /// SSTables newest-to-oldest (bloom-filter gated). A tombstone observed
    /// at any layer short-circuits to `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let mem = self.state.mem.lock();
            if let Some(v) = mem.active.get(key) {
                return Ok(v.as_put().map(|b| b.to_vec()));
            }
            if let Some(flushing) = &mem.flushing {
                if let Some(v) = flushing.get(key) {
                    return Ok(v.as_put().map(|b| b.to_vec()));
                }
            }
        }
        if let Some(v) = self.state.cache.get(key) {
            return Ok(Some(v));
        }
        let tables = self.state.sstables.read().clone();
        for table in tables.iter().rev() {
            if let Some(v) = table.get(key)? {
                return Ok(match v {
                    MemValue::Tombstone => None,
                    MemValue::Put(bytes) => {
                        self.state.cache.put(key.to_vec(), bytes.clone());
                        Some(bytes)
                    }
                });
            }
        }
        Ok(None)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.state.wal.append(WalOp::Delete, key.to_vec(), Vec::new())?;
        {
            let mut mem = self.state.mem.lock();
            mem.active.delete(key.to_vec());
        }
        self.state.cache.invalidate(key);
        Ok(())
    }

    /// Merge-range-iterate both memtables and all SSTables over `[start,
    /// end]`; per key, the highest-priority layer wins (active > flushing >
    /// newest SSTable > ... > oldest); tombstones suppress output.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, MemValue> = BTreeMap::new();

        let tables = self.state.sstables.read().clone();
        for table in tables.iter() {
            for (k, v) in table.range_scan(start, Some(end))? {
                merged.insert(k, v);
            }
        }
        {
            let mem = self.state.mem.lock();
            if let Some(flushing) = &mem.flushing {
                for (k, v) in flushing.range(start, Some(end)) {
                    merged.insert(k.clone(), v.clone());
                }
            }
            for (k, v) in mem.active.range(start, Some(end)) {
                merged.insert(k.clone(), v.clone());
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| match v {
                MemValue::Put(bytes) => Some((k, bytes)),
                MemValue::Tombstone => None,
            })
            .collect())
    }

    pub fn stats(&self) -> EngineStats {
        let mem = self.state.mem.lock();
        EngineStats {
            active_memtable_bytes: mem.active.approx_size_bytes(),
            active_memtable_len: mem.active.len(),
            flush_in_progress: mem.flush_in_progress,
            flushing_memtable_len: mem.flushing.as_ref().map(|m| m.len()).unwrap_or(0),
            sstable_count: self.state.sstables.read().len(),
            total_keys_estimate: self.state.sstables.read().iter().map(|t| t.stats().entry_count).sum::<usize>()
                + mem.active.len(),
            flush_count: self.state.flush_count.load(Ordering::Relaxed),
            compaction_count: self.state.compaction_count.load(Ordering::Relaxed),
            cache: self.state.cache.stats(),
        }
    }

    /// Stop the compaction worker, drain any flushing memtable, force-flush
    /// the active memtable if non-empty, sync and truncate the WAL.
    pub fn close(self) -> Result<()> {
        self.compaction_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.compaction_thread.lock().take() {
            let _ = handle.join();
        }

        // Wait out any in-flight flush, then force a final flush of
        // whatever remains in the active memtable.
        loop {
            let mut mem = self.state.mem.lock();
            while mem.flush_in_progress {
                self.state.mem_cv.wait(&mut mem);
            }
            if mem.active.is_empty() {
                break;
            }
            let flushing = std::mem::replace(&mut mem.active, Memtable::new());
            mem.flushing = Some(flushing);
            mem.flush_in_progress = true;
            drop(mem);
            flush::run(Arc::clone(&self.state));
        }

        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }

        self.state.wal.sync()?;
        self.state.wal.truncate()?;
        Ok(())
    }

    fn trigger_flush(&self) {
        let mut mem = self.state.mem.lock();
        while mem.flush_in_progress {
            self.state.mem_cv.wait(&mut mem);
        }
        if mem.active.is_empty() {
            return;
        }
        let flushing = std::mem::replace(&mut mem.active, Memtable::new());
        mem.flushing = Some(flushing);
        mem.flush_in_progress = true;
        drop(mem);

        let state = Arc::clone(&self.state);
        let pool = self.pool.lock();
        match pool.as_ref() {
            Some(pool) => pool.submit(Box::new(move || flush::run(state))),
            None => flush::run(state),
        }
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        self.compaction_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.compaction_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
    }
}

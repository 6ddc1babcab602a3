// engine/recovery.rs
// Startup recovery: load every SSTable found in the data directory (sorted
// by name, so `sstable_*` and `compacted_*` interleave in generation order),
// then replay the WAL into a fresh active memtable. The WAL itself is left
// untouched here -- truncation is only safe after a clean `close()` that
// flushed the active memtable (§4.5.4).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::cache::ReadThroughCache;
use crate::config::Config;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::sstable::SsTable;
use crate::wal::WriteAheadLog;

use super::{compaction, EngineState, LsmEngine, MemState, WorkerPool};

pub(super) fn open(data_dir: PathBuf, config: Config) -> Result<LsmEngine> {
    config.validate()?;
    std::fs::create_dir_all(&data_dir)?;

    let mut tables = Vec::new();
    for base in discover_table_bases(&data_dir)? {
        match SsTable::open(&base) {
            Ok(table) => tables.push(Arc::new(table)),
            Err(e) => {
                tracing::warn!(path = ?base, error = %e, "skipping incomplete/corrupt sstable");
                cleanup_partial_files(&base);
            }
        }
    }

    let wal_path = data_dir.join("wal.log");
    let wal = WriteAheadLog::open(&wal_path, config.wal_batch_size, config.wal_flush_interval())?;

    let mut active = Memtable::new();
    for record in wal.replay()? {
        match record.op {
            crate::wal::WalOp::Put => active.put(record.key, record.value),
            crate::wal::WalOp::Delete => active.delete(record.key),
        }
    }

    let state = Arc::new(EngineState {
        cache: ReadThroughCache::new(config.cache_capacity),
        data_dir,
        mem: Mutex::new(MemState {
            active,
            flushing: None,
            flush_in_progress: false,
        }),
        mem_cv: Condvar::new(),
        sstables: RwLock::new(tables),
        generation: AtomicU64::new(0),
        flush_count: AtomicU64::new(0),
        compaction_count: AtomicU64::new(0),
        wal,
        config,
    });

    let compaction_stop = Arc::new(AtomicBool::new(false));
    let compaction_thread = compaction::spawn_loop(Arc::clone(&state), Arc::clone(&compaction_stop));

    Ok(LsmEngine {
        state,
        pool: Mutex::new(Some(WorkerPool::new(2))),
        compaction_stop,
        compaction_thread: Mutex::new(Some(compaction_thread)),
    })
}

/// Base paths (without extension) of every table whose `.data`/`.index`/
/// `.bloom` trio is fully present, sorted by name so generations replay and
/// merge in creation order. A table missing any sidecar file is a partial
/// write from a crash mid-flush/compaction and is skipped.
fn discover_table_bases(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut by_base: std::collections::BTreeMap<PathBuf, HashSet<&'static str>> =
        std::collections::BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let tag = match ext {
            "data" => "data",
            "index" => "index",
            "bloom" => "bloom",
            _ => continue,
        };
        let base = path.with_extension("");
        by_base.entry(base).or_default().insert(tag);
    }

    Ok(by_base
        .into_iter()
        .filter(|(_, tags)| tags.len() == 3)
        .map(|(base, _)| base)
        .collect())
}

fn cleanup_partial_files(base: &std::path::Path) {
    for ext in ["data", "index", "bloom"] {
        let p = base.with_extension(ext);
        let _ = std::fs::remove_file(p);
    }
}

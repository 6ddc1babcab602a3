// engine/compaction.rs
// Background total-compaction sweep: once the SSTable count reaches the
// configured threshold, snapshot the current list, read every table in
// parallel, merge into one sorted map keeping the newest value per key, drop
// tombstones entirely (compaction is total, so nothing older can still need
// them), and swap the result in under the SSTable lock without holding it
// during I/O.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::memtable::MemValue;
use crate::sstable::SsTable;

use super::EngineState;

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactionStats {
    pub tables_before: usize,
    pub tables_after: usize,
    pub entries_before: usize,
    pub entries_after: usize,
    pub tombstones_dropped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl CompactionStats {
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_before == 0 {
            return 1.0;
        }
        self.bytes_after as f64 / self.bytes_before as f64
    }
}

pub(super) fn spawn_loop(state: Arc<EngineState>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("ironbase-compaction".into())
        .spawn(move || {
            let interval = state.config.compaction_interval();
            let slice = interval.min(Duration::from_millis(200)).max(Duration::from_millis(1));
            let mut elapsed = Duration::ZERO;
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(slice);
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                elapsed += slice;
                if elapsed < interval {
                    continue;
                }
                elapsed = Duration::ZERO;
                if let Err(e) = run_once(&state) {
                    tracing::error!(error = %e, "compaction sweep failed, retrying next cycle");
                }
            }
        })
        .expect("failed to spawn compaction thread")
}

/// Rebuilds the live SSTable list after a sweep: tables whose path was part
/// of the compacted `snapshot` are dropped (returned as `removed`), and
/// `new_table` is spliced in *before* whatever tables remain -- those are
/// ones flushed during the sweep's I/O window, so they are newer than
/// anything `new_table` merges. Landing `new_table` at the newest position
/// instead would let a key rewritten mid-sweep resolve to the stale
/// compacted value under the newest-to-oldest read order.
fn splice_compacted(
    tables: Vec<Arc<SsTable>>,
    snapshot_paths: &HashSet<PathBuf>,
    new_table: Arc<SsTable>,
) -> (Vec<Arc<SsTable>>, Vec<Arc<SsTable>>) {
    let mut kept = Vec::with_capacity(tables.len());
    let mut removed = Vec::new();
    for t in tables {
        if snapshot_paths.contains(t.base_path()) {
            removed.push(t);
        } else {
            kept.push(t);
        }
    }
    let mut new_list = Vec::with_capacity(kept.len() + 1);
    new_list.push(new_table);
    new_list.extend(kept);
    (new_list, removed)
}

pub(super) fn run_once(state: &Arc<EngineState>) -> crate::error::Result<Option<CompactionStats>> {
    let snapshot: Vec<Arc<SsTable>> = state.sstables.read().clone();
    if snapshot.len() < state.config.compaction_sstable_threshold {
        return Ok(None);
    }

    let bytes_before: u64 = snapshot.iter().map(|t| t.stats().data_bytes).sum();
    let entries_before: usize = snapshot.iter().map(|t| t.stats().entry_count).sum();

    // Read every table's full contents in parallel; oldest-first order is
    // preserved so the merge step below resolves duplicate keys to the
    // newest-generation value.
    let layers = crossbeam::scope(|scope| {
        let handles: Vec<_> = snapshot
            .iter()
            .map(|table| scope.spawn(move |_| table.all()))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<crate::error::Result<Vec<_>>>()
    })
    .expect("compaction reader thread panicked")?;

    let mut merged: BTreeMap<Vec<u8>, MemValue> = BTreeMap::new();
    for layer in layers {
        for (k, v) in layer {
            merged.insert(k, v);
        }
    }

    let mut tombstones_dropped = 0usize;
    let live: Vec<(Vec<u8>, MemValue)> = merged
        .into_iter()
        .filter(|(_, v)| match v {
            MemValue::Tombstone => {
                tombstones_dropped += 1;
                false
            }
            MemValue::Put(_) => true,
        })
        .collect();

    let generation = state.generation.fetch_add(1, Ordering::Relaxed);
    let base = crate::sstable::next_compacted_path(&state.data_dir, generation);
    let new_table = Arc::new(SsTable::build(
        &base,
        &live,
        state.config.bloom_false_positive_rate,
    )?);
    let bytes_after = new_table.stats().data_bytes;
    let entries_after = new_table.stats().entry_count;

    let snapshot_paths: HashSet<_> = snapshot.iter().map(|t| t.base_path().to_path_buf()).collect();

    let old_tables = {
        let mut tables = state.sstables.write();
        let (new_list, removed) = splice_compacted(std::mem::take(&mut *tables), &snapshot_paths, new_table);
        *tables = new_list;
        removed
    };

    for table in &old_tables {
        if let Err(e) = table.delete_files() {
            tracing::warn!(error = %e, path = ?table.base_path(), "failed to delete superseded sstable files");
        }
    }

    state.compaction_count.fetch_add(1, Ordering::Relaxed);
    let stats = CompactionStats {
        tables_before: snapshot.len(),
        tables_after: state.sstables.read().len(),
        entries_before,
        entries_after,
        tombstones_dropped,
        bytes_before,
        bytes_after,
    };
    tracing::info!(?stats, "compaction sweep completed");
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn build_table(dir: &std::path::Path, name: &str, key: &str, value: &str) -> Arc<SsTable> {
        let entries = vec![(key.as_bytes().to_vec(), MemValue::Put(value.as_bytes().to_vec()))];
        Arc::new(SsTable::build(dir.join(name), &entries, 0.01).unwrap())
    }

    #[test]
    fn compacted_table_lands_older_than_tables_flushed_during_the_sweep() {
        let dir = tempdir().unwrap();
        let old1 = build_table(dir.path(), "old1", "x", "stale");
        let old2 = build_table(dir.path(), "old2", "y", "also-stale");
        // Simulates a flush that completed *after* the compaction snapshot
        // was taken but *before* the compacted output was spliced in -- it
        // holds a newer value for a key the snapshot also covered.
        let flushed_during_sweep = build_table(dir.path(), "newer", "x", "fresh");
        let compacted = build_table(dir.path(), "compacted", "x", "fresh");

        let mut snapshot_paths = HashSet::new();
        snapshot_paths.insert(old1.base_path().to_path_buf());
        snapshot_paths.insert(old2.base_path().to_path_buf());

        let live = vec![old1.clone(), old2.clone(), flushed_during_sweep.clone()];
        let (new_list, removed) = splice_compacted(live, &snapshot_paths, compacted.clone());

        assert_eq!(removed.len(), 2);
        assert!(removed.iter().any(|t| Arc::ptr_eq(t, &old1)));
        assert!(removed.iter().any(|t| Arc::ptr_eq(t, &old2)));

        // The compacted table must be *older* (earlier in the oldest-first
        // list) than the table flushed mid-sweep, so a newest-to-oldest
        // reader hits the fresh value first.
        assert_eq!(new_list.len(), 2);
        assert!(Arc::ptr_eq(&new_list[0], &compacted));
        assert!(Arc::ptr_eq(&new_list[1], &flushed_during_sweep));
    }
}

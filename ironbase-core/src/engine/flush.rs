// engine/flush.rs
// The flush task: write the flushing memtable's sorted contents to a new
// SSTable, append it to the engine's SSTable list, then clear the
// `flushing` slot and the in-progress flag so waiting writers and the next
// flush trigger can proceed. Never holds the memtable lock during I/O --
// readers see a consistent view of `flushing` the whole time it runs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::sstable::{self, SsTable};

use super::EngineState;

pub(super) fn run(state: Arc<EngineState>) {
    let entries = {
        let mem = state.mem.lock();
        match &mem.flushing {
            Some(flushing) => flushing
                .iter_sorted()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>(),
            None => return,
        }
    };

    let generation = state.generation.fetch_add(1, Ordering::Relaxed);
    let base = sstable::next_sstable_path(&state.data_dir, generation);

    match SsTable::build(&base, &entries, state.config.bloom_false_positive_rate) {
        Ok(table) => {
            state.sstables.write().push(Arc::new(table));
            let mut mem = state.mem.lock();
            mem.flushing = None;
            mem.flush_in_progress = false;
            drop(mem);
            state.flush_count.fetch_add(1, Ordering::Relaxed);
            state.mem_cv.notify_all();
            tracing::debug!(entries = entries.len(), generation, "flushed memtable to sstable");
        }
        Err(e) => {
            // The flushing memtable is left in place so a later flush
            // attempt can retry; the WAL still holds every record in it, so
            // no acknowledged write is lost.
            tracing::error!(error = %e, generation, "memtable flush failed, will retry later");
            let mut mem = state.mem.lock();
            mem.flush_in_progress = false;
            drop(mem);
            state.mem_cv.notify_all();
        }
    }
}

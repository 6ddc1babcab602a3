// wal/mod.rs
// Write-ahead log: flat `timestamp|op|key|value` records, group-commit
// batching, and a crash-safe streaming reader.
//
// - `WalRecord`/`WalOp`: record encoding
// - `WalEntryIterator`: streaming decode, stops silently at a torn tail
// - `WriteAheadLog`: buffered writer with a background flush thread

mod entry;
mod reader;
mod writer;

pub use entry::{WalOp, WalRecord};
pub use reader::WalEntryIterator;
pub use writer::{WalStats, WriteAheadLog};

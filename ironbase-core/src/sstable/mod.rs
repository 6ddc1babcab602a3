// sstable/mod.rs
// Immutable sorted-string table: a flushed memtable's contents as three
// sidecar files sharing one base path -- "<base>.data", "<base>.index",
// "<base>.bloom". Data is written once and mmap'd for reads; the in-memory
// index and bloom filter are rebuilt on load from the ".index"/".bloom"
// sidecars rather than re-scanning ".data".

mod bloom;

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::memtable::MemValue;

pub use bloom::SsTableBloom;

#[derive(Debug, Clone, Copy, Default)]
pub struct SsTableStats {
    pub entry_count: usize,
    pub tombstone_count: usize,
    pub data_bytes: u64,
}

/// One immutable, sorted, on-disk table.
pub struct SsTable {
    base_path: PathBuf,
    data: Mmap,
    /// Full in-memory key -> byte-offset-in-data index. SSTables are sized
    /// to the memtable flush threshold, so this stays small enough to keep
    /// resident; see DESIGN.md for the "no sparse index" call.
    index: BTreeMap<Vec<u8>, u64>,
    bloom: SsTableBloom,
    stats: SsTableStats,
}

impl SsTable {
    /// Write a new table from a sorted (key, value) sequence, producing the
    /// `.data`/`.index`/`.bloom` trio atomically (temp file + rename).
    pub fn build(
        base_path: impl AsRef<Path>,
        entries: &[(Vec<u8>, MemValue)],
        bloom_false_positive_rate: f64,
    ) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let data_path = base_path.with_extension("data");
        let index_path = base_path.with_extension("index");
        let bloom_path = base_path.with_extension("bloom");

        let data_tmp = base_path.with_extension("data.tmp");
        let mut index = BTreeMap::new();
        let mut bloom_filter = SsTableBloom::build(entries.len(), bloom_false_positive_rate)?;
        let mut stats = SsTableStats::default();

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&data_tmp)?;
            let mut offset = 0u64;
            for (key, value) in entries {
                let record = encode_record(key, value);
                file.write_all(&record)?;
                index.insert(key.clone(), offset);
                bloom_filter.insert(key);
                stats.entry_count += 1;
                if matches!(value, MemValue::Tombstone) {
                    stats.tombstone_count += 1;
                }
                offset += record.len() as u64;
            }
            file.flush()?;
            file.sync_all()?;
            stats.data_bytes = offset;
        }
        std::fs::rename(&data_tmp, &data_path)?;

        let index_bytes = bincode::serialize(&index)?;
        let index_tmp = base_path.with_extension("index.tmp");
        std::fs::write(&index_tmp, &index_bytes)?;
        std::fs::rename(&index_tmp, &index_path)?;

        bloom_filter.save(&bloom_path)?;

        let data_file = OpenOptions::new().read(true).open(&data_path)?;
        let data = unsafe { Mmap::map(&data_file)? };

        Ok(SsTable {
            base_path,
            data,
            index,
            bloom: bloom_filter,
            stats,
        })
    }

    /// Reopen a previously-built table from its sidecar files.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let data_path = base_path.with_extension("data");
        let index_path = base_path.with_extension("index");
        let bloom_path = base_path.with_extension("bloom");

        let data_file = OpenOptions::new().read(true).open(&data_path)?;
        let data = unsafe { Mmap::map(&data_file)? };

        let index_bytes = std::fs::read(&index_path)?;
        let index: BTreeMap<Vec<u8>, u64> = bincode::deserialize(&index_bytes)?;

        let bloom = SsTableBloom::load(&bloom_path)?;

        let mut stats = SsTableStats {
            entry_count: index.len(),
            data_bytes: data.len() as u64,
            ..Default::default()
        };
        for offset in index.values() {
            if let Ok((_, value)) = decode_record_at(&data, *offset as usize) {
                if matches!(value, MemValue::Tombstone) {
                    stats.tombstone_count += 1;
                }
            }
        }

        Ok(SsTable {
            base_path,
            data,
            index,
            bloom,
            stats,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn stats(&self) -> SsTableStats {
        self.stats
    }

    /// Look up a key. `Some(Tombstone)` means "known deleted at this table's
    /// generation"; `None` means absent (ask an older table).
    pub fn get(&self, key: &[u8]) -> Result<Option<MemValue>> {
        if !self.bloom.might_contain(key) {
            return Ok(None);
        }
        let Some(&offset) = self.index.get(key) else {
            return Ok(None);
        };
        let (_, value) = decode_record_at(&self.data, offset as usize)?;
        Ok(Some(value))
    }

    /// Ordered scan over `[start, end]` (inclusive); `end = None` is unbounded.
    pub fn range_scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, MemValue)>> {
        use std::ops::Bound;
        let upper = match end {
            Some(e) => Bound::Included(e.to_vec()),
            None => Bound::Unbounded,
        };
        let mut out = Vec::new();
        for (key, &offset) in self.index.range((Bound::Included(start.to_vec()), upper)) {
            let (_, value) = decode_record_at(&self.data, offset as usize)?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    /// Every live entry and tombstone in this table, in key order. Used by
    /// compaction, which must see tombstones too (to know what to drop).
    pub fn all(&self) -> Result<Vec<(Vec<u8>, MemValue)>> {
        let mut out = Vec::with_capacity(self.index.len());
        for (key, &offset) in self.index.iter() {
            let (_, value) = decode_record_at(&self.data, offset as usize)?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    pub fn delete_files(&self) -> Result<()> {
        for ext in ["data", "index", "bloom"] {
            let p = self.base_path.with_extension(ext);
            if p.exists() {
                std::fs::remove_file(p)?;
            }
        }
        Ok(())
    }
}

fn encode_record(key: &[u8], value: &MemValue) -> Vec<u8> {
    let (tombstone, payload): (u8, &[u8]) = match value {
        MemValue::Put(v) => (0, v.as_slice()),
        MemValue::Tombstone => (1, &[]),
    };
    let mut buf = Vec::with_capacity(4 + key.len() + 1 + 4 + payload.len());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.push(tombstone);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_record_at(data: &[u8], offset: usize) -> Result<(Vec<u8>, MemValue)> {
    let mut pos = offset;
    let read_u32 = |pos: &mut usize| -> Result<u32> {
        if *pos + 4 > data.len() {
            return Err(Error::corruption("SSTable record truncated"));
        }
        let v = u32::from_le_bytes(data[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        Ok(v)
    };

    let key_len = read_u32(&mut pos)? as usize;
    if pos + key_len > data.len() {
        return Err(Error::corruption("SSTable record truncated"));
    }
    let key = data[pos..pos + key_len].to_vec();
    pos += key_len;

    if pos >= data.len() {
        return Err(Error::corruption("SSTable record truncated"));
    }
    let tombstone = data[pos];
    pos += 1;

    let value_len = read_u32(&mut pos)? as usize;
    if pos + value_len > data.len() {
        return Err(Error::corruption("SSTable record truncated"));
    }
    let value = if tombstone == 1 {
        MemValue::Tombstone
    } else {
        MemValue::Put(data[pos..pos + value_len].to_vec())
    };

    Ok((key, value))
}

/// Merge multiple tables' SSTables (oldest first) plus any still-live
/// memtable entries into one sorted stream, keeping only the newest value
/// per key. Used by both `range_scan` fallthrough and full-compaction merge.
pub fn merge_newest_first<'a>(
    layers: impl Iterator<Item = &'a [(Vec<u8>, MemValue)]>,
) -> Vec<(Vec<u8>, MemValue)> {
    // Later layers in the iterator order win; caller passes oldest-to-newest
    // so a simple insert-overwrite resolves to "last write wins".
    let mut merged: BTreeMap<Vec<u8>, MemValue> = BTreeMap::new();
    for layer in layers {
        for (k, v) in layer {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged.into_iter().collect()
}

pub fn next_sstable_path(dir: impl AsRef<Path>, generation: u64) -> PathBuf {
    dir.as_ref().join(format!("sstable_{:020}", generation))
}

pub fn next_compacted_path(dir: impl AsRef<Path>, generation: u64) -> PathBuf {
    dir.as_ref().join(format!("compacted_{:020}", generation))
}

pub type SharedSsTable = Arc<SsTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries() -> Vec<(Vec<u8>, MemValue)> {
        vec![
            (b"a".to_vec(), MemValue::Put(b"1".to_vec())),
            (b"b".to_vec(), MemValue::Tombstone),
            (b"c".to_vec(), MemValue::Put(b"3".to_vec())),
        ]
    }

    #[test]
    fn build_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let table = SsTable::build(dir.path().join("000"), &entries(), 0.01).unwrap();

        assert_eq!(table.get(b"a").unwrap(), Some(MemValue::Put(b"1".to_vec())));
        assert_eq!(table.get(b"b").unwrap(), Some(MemValue::Tombstone));
        assert_eq!(table.get(b"missing").unwrap(), None);
    }

    #[test]
    fn reopen_reads_same_contents() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("000");
        SsTable::build(&base, &entries(), 0.01).unwrap();

        let reopened = SsTable::open(&base).unwrap();
        assert_eq!(reopened.get(b"c").unwrap(), Some(MemValue::Put(b"3".to_vec())));
        assert_eq!(reopened.stats().entry_count, 3);
        assert_eq!(reopened.stats().tombstone_count, 1);
    }

    #[test]
    fn range_scan_is_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let table = SsTable::build(dir.path().join("000"), &entries(), 0.01).unwrap();
        let scanned = table.range_scan(b"a", Some(b"c")).unwrap();
        assert_eq!(scanned.len(), 3);
        assert_eq!(scanned[0].0, b"a".to_vec());
        assert_eq!(scanned[1].0, b"b".to_vec());
        assert_eq!(scanned[2].0, b"c".to_vec());
    }

    #[test]
    fn merge_newest_first_prefers_later_layers() {
        let old: Vec<(Vec<u8>, MemValue)> = vec![(b"k".to_vec(), MemValue::Put(b"old".to_vec()))];
        let new: Vec<(Vec<u8>, MemValue)> = vec![(b"k".to_vec(), MemValue::Put(b"new".to_vec()))];
        let merged = merge_newest_first([old.as_slice(), new.as_slice()].into_iter());
        assert_eq!(merged, vec![(b"k".to_vec(), MemValue::Put(b"new".to_vec()))]);
    }
}

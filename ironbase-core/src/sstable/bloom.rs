// sstable/bloom.rs
// Per-SSTable bloom filter, persisted as a ".bloom" sidecar file so a
// negative lookup never has to touch the (possibly memmap'd) data file.

use std::io::{Read, Write};
use std::path::Path;

use bloomfilter::Bloom;

use crate::error::{Error, Result};

pub struct SsTableBloom {
    filter: Bloom<[u8]>,
}

impl SsTableBloom {
    /// Size the filter for `expected_items` keys at `false_positive_rate`.
    pub fn build(expected_items: usize, false_positive_rate: f64) -> Result<Self> {
        let expected_items = expected_items.max(1);
        let filter = Bloom::new_for_fp_rate(expected_items, false_positive_rate)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        Ok(SsTableBloom { filter })
    }

    pub fn insert(&mut self, key: &[u8]) {
        self.filter.set(key);
    }

    /// `false` is a definite negative; `true` means "maybe present, go check
    /// the index".
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.filter.check(key)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tmp_path = path.as_ref().with_extension("bloom.tmp");
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(self.filter.as_slice())?;
        f.sync_all()?;
        std::fs::rename(&tmp_path, path.as_ref())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut f = std::fs::File::open(path)?;
        let mut raw = Vec::new();
        f.read_to_end(&mut raw)?;

        let filter = Bloom::from_bytes(raw)
            .map_err(|e| Error::corruption(format!("corrupt bloom filter sidecar: {e}")))?;
        Ok(SsTableBloom { filter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn contains_inserted_keys() {
        let mut bloom = SsTableBloom::build(100, 0.01).unwrap();
        bloom.insert(b"hello");
        bloom.insert(b"world");
        assert!(bloom.might_contain(b"hello"));
        assert!(bloom.might_contain(b"world"));
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bloom");
        let mut bloom = SsTableBloom::build(10, 0.01).unwrap();
        bloom.insert(b"a");
        bloom.save(&path).unwrap();

        let loaded = SsTableBloom::load(&path).unwrap();
        assert!(loaded.might_contain(b"a"));
    }
}

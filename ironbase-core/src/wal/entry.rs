// wal/entry.rs
// WAL record encoding: timestamp(8)|op_len(4)|op|key_len(4)|key|value_len(4)|value|checksum(4)

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    Put,
    Delete,
}

impl WalOp {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            WalOp::Put => b"PUT",
            WalOp::Delete => b"DELETE",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"PUT" => Ok(WalOp::Put),
            b"DELETE" => Ok(WalOp::Delete),
            other => Err(Error::corruption(format!(
                "unknown WAL op {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub timestamp_ms: u64,
    pub op: WalOp,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WalRecord {
    pub fn put(timestamp_ms: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        WalRecord {
            timestamp_ms,
            op: WalOp::Put,
            key,
            value,
        }
    }

    pub fn delete(timestamp_ms: u64, key: Vec<u8>) -> Self {
        WalRecord {
            timestamp_ms,
            op: WalOp::Delete,
            key,
            value: Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.op, WalOp::Delete)
    }

    /// Encode this record, including the trailing CRC32 checksum computed
    /// over every byte that precedes it.
    pub fn encode(&self) -> Vec<u8> {
        let op_bytes = self.op.as_bytes();
        let mut buf = Vec::with_capacity(
            8 + 4 + op_bytes.len() + 4 + self.key.len() + 4 + self.value.len() + 4,
        );

        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&(op_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(op_bytes);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.value);

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decode one record from the front of `buf`, returning the record and
    /// the number of bytes consumed. Any truncation or checksum mismatch is
    /// reported identically via `Err` so the caller can stop replay there.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut pos = 0usize;
        let read = |pos: &mut usize, n: usize| -> Result<&[u8]> {
            if *pos + n > buf.len() {
                return Err(Error::corruption("short read in WAL record"));
            }
            let slice = &buf[*pos..*pos + n];
            *pos += n;
            Ok(slice)
        };

        let timestamp_ms = u64::from_le_bytes(read(&mut pos, 8)?.try_into().unwrap());

        let op_len = u32::from_le_bytes(read(&mut pos, 4)?.try_into().unwrap()) as usize;
        let op = WalOp::from_bytes(read(&mut pos, op_len)?)?;

        let key_len = u32::from_le_bytes(read(&mut pos, 4)?.try_into().unwrap()) as usize;
        let key = read(&mut pos, key_len)?.to_vec();

        let value_len = u32::from_le_bytes(read(&mut pos, 4)?.try_into().unwrap()) as usize;
        let value = read(&mut pos, value_len)?.to_vec();

        let body_end = pos;
        let checksum = u32::from_le_bytes(read(&mut pos, 4)?.try_into().unwrap());
        let expected = crc32fast::hash(&buf[..body_end]);
        if checksum != expected {
            return Err(Error::corruption("WAL record checksum mismatch"));
        }

        Ok((
            WalRecord {
                timestamp_ms,
                op,
                key,
                value,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_put_and_delete() {
        let put = WalRecord::put(1000, b"k".to_vec(), b"v".to_vec());
        let encoded = put.encode();
        let (decoded, consumed) = WalRecord::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, put);

        let del = WalRecord::delete(2000, b"k".to_vec());
        let encoded = del.encode();
        let (decoded, _) = WalRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, del);
        assert!(decoded.is_tombstone());
    }

    #[test]
    fn detects_torn_tail() {
        let rec = WalRecord::put(1, b"key".to_vec(), b"value".to_vec());
        let mut encoded = rec.encode();
        encoded.truncate(encoded.len() - 3);
        assert!(WalRecord::decode(&encoded).is_err());
    }

    #[test]
    fn detects_checksum_corruption() {
        let rec = WalRecord::put(1, b"key".to_vec(), b"value".to_vec());
        let mut encoded = rec.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(WalRecord::decode(&encoded).is_err());
    }
}

// wal/reader.rs
// Streaming WAL reader: decodes one record at a time instead of buffering
// the whole file, and treats any decode failure as a torn tail rather than
// a hard error (a crash mid-write leaves an incomplete final record).

use std::io::Read;

use super::entry::WalRecord;

pub struct WalEntryIterator<R: Read> {
    reader: R,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read> WalEntryIterator<R> {
    pub fn new(reader: R) -> crate::error::Result<Self> {
        Ok(WalEntryIterator {
            reader,
            buf: Vec::new(),
            done: false,
        })
    }

    fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; 64 * 1024];
        let n = self.reader.read(&mut chunk)?;
        if n > 0 {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }
}

impl<R: Read> Iterator for WalEntryIterator<R> {
    type Item = WalRecord;

    fn next(&mut self) -> Option<WalRecord> {
        if self.done {
            return None;
        }
        loop {
            match WalRecord::decode(&self.buf) {
                Ok((record, consumed)) => {
                    self.buf.drain(..consumed);
                    return Some(record);
                }
                Err(_) => match self.fill() {
                    Ok(0) => {
                        self.done = true;
                        return None;
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        self.done = true;
                        return None;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::entry::WalOp;
    use std::io::Cursor;

    #[test]
    fn iterates_all_records_in_order() {
        let a = WalRecord::put(1, b"a".to_vec(), b"1".to_vec());
        let b = WalRecord::delete(2, b"b".to_vec());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&a.encode());
        bytes.extend_from_slice(&b.encode());

        let iter = WalEntryIterator::new(Cursor::new(bytes)).unwrap();
        let records: Vec<_> = iter.collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].op, WalOp::Put);
        assert_eq!(records[1].op, WalOp::Delete);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let iter = WalEntryIterator::new(Cursor::new(Vec::<u8>::new())).unwrap();
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn torn_tail_record_is_dropped_silently() {
        let a = WalRecord::put(1, b"a".to_vec(), b"1".to_vec());
        let b = WalRecord::put(2, b"b".to_vec(), b"2".to_vec());
        let mut bytes = a.encode();
        let mut tail = b.encode();
        tail.truncate(tail.len() - 4);
        bytes.extend_from_slice(&tail);

        let iter = WalEntryIterator::new(Cursor::new(bytes)).unwrap();
        let records: Vec<_> = iter.collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, b"a");
    }
}

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Address, Record, RECORD_SIZE};
use crate::storage::codec;

/// Append-structured file of encoded records. A record is identified by the
/// byte offset it was written at.
pub struct RecordStore {
    pub path: PathBuf,
    file: File,
    len: u64,
}

impl RecordStore {
    /// Open (creating if absent) for reading and appending.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Open an existing store for reads only.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> Result<Self> {
        let len = file.metadata()?.len();

        if len % RECORD_SIZE as u64 != 0 {
            warn!(
                path = %path.display(),
                len,
                "store length is not a multiple of the record size; trailing bytes are unreachable"
            );
        }

        Ok(RecordStore { path: path.to_path_buf(), file, len })
    }

    /// Create an empty store, replacing whatever was at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(RecordStore { path: path.to_path_buf(), file, len: 0 })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of whole records in the file.
    pub fn record_count(&self) -> u64 {
        self.len / RECORD_SIZE as u64
    }

    /// Write `record` at the current end and return where it landed.
    pub fn append(&mut self, record: &Record) -> Result<Address> {
        let buf = codec::encode(record)?;
        let at = Address::new(self.len);

        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(&buf)?;
        self.len += RECORD_SIZE as u64;

        Ok(at)
    }

    pub fn read(&mut self, at: Address) -> Result<Record> {
        at.check(self.len)?;

        let mut buf = [0u8; RECORD_SIZE];
        self.file.seek(SeekFrom::Start(at.offset()))?;
        match self.file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::new(
                    ErrorKind::CorruptRead,
                    format!("short read at offset {}", at),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        codec::decode(&buf)
    }

    /// Overwrite the record at `at`. Only the index rebuild pass uses this.
    pub(crate) fn write_at(&mut self, at: Address, record: &Record) -> Result<()> {
        at.check(self.len)?;
        let buf = codec::encode(record)?;

        self.file.seek(SeekFrom::Start(at.offset()))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Copy already-encoded records from `reader` to the end of the store.
    /// The copied length must be a whole number of records.
    pub(crate) fn append_encoded<R: Read>(&mut self, reader: &mut R) -> Result<u64> {
        self.file.seek(SeekFrom::Start(self.len))?;
        let copied = io::copy(reader, &mut self.file)?;
        self.len += copied;

        if copied % RECORD_SIZE as u64 != 0 {
            return Err(Error::new(
                ErrorKind::Format,
                format!("{} bytes is not a whole number of records", copied),
            ));
        }
        Ok(copied / RECORD_SIZE as u64)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Sequential scan over every whole record, live or garbage.
    pub fn scan(&self) -> Result<StoreScan> {
        let file = File::open(&self.path)?;
        Ok(StoreScan {
            reader: BufReader::with_capacity(RECORD_SIZE * 1024, file),
            next: Address::ZERO,
            remaining: self.record_count(),
        })
    }
}

/// Iterator over `(address, record)` in file order
pub struct StoreScan {
    reader: BufReader<File>,
    next: Address,
    remaining: u64,
}

impl Iterator for StoreScan {
    type Item = Result<(Address, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let mut buf = [0u8; RECORD_SIZE];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            self.remaining = 0;
            return Some(Err(e.into()));
        }
        let at = self.next;
        self.next = at.following();

        Some(codec::decode(&buf).map(|record| (at, record)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_returns_consecutive_offsets() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(&dir.path().join("r.dat")).unwrap();

        let a = store.append(&Record::new(1)).unwrap();
        let b = store.append(&Record::new(2)).unwrap();
        assert_eq!(a, Address::ZERO);
        assert_eq!(b.offset(), RECORD_SIZE as u64);
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.read(b).unwrap().id, 2);
    }

    #[test]
    fn reads_past_the_end_are_out_of_range() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(&dir.path().join("r.dat")).unwrap();
        store.append(&Record::new(1)).unwrap();

        let err = store.read(Address::new(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
        let err = store.read(Address::new(RECORD_SIZE as u64)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn scan_yields_records_in_file_order() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(&dir.path().join("r.dat")).unwrap();
        for id in [7, 8, 9] {
            store.append(&Record::new(id)).unwrap();
        }
        store.flush().unwrap();

        let ids: Vec<i32> = store.scan().unwrap().map(|r| r.unwrap().1.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn read_only_open_needs_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.dat");
        assert!(RecordStore::open_read_only(&path).is_err());
        assert!(!path.exists());

        RecordStore::open(&path).unwrap().append(&Record::new(4)).unwrap();
        let mut store = RecordStore::open_read_only(&path).unwrap();
        assert_eq!(store.read(Address::ZERO).unwrap().id, 4);
        assert!(store.append(&Record::new(5)).is_err());
    }

    #[test]
    fn append_encoded_rejects_partial_records() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(&dir.path().join("r.dat")).unwrap();
        let mut bytes: &[u8] = &[0u8; 10];
        let err = store.append_encoded(&mut bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }
}

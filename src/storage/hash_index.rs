use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Address, ENTRY_SIZE, NULL_OFFSET};

/// Fixed-size file of one 8-byte bucket head per bucket.
///
/// A file shorter than `table_size * 8` bytes reads as NULL for every missing
/// entry and is padded out to full length on the first write.
pub struct HashIndex {
    pub path: PathBuf,
    file: File,
    table_size: u32,
    len: u64,
}

impl HashIndex {
    /// Open an existing index, or create a fully NULL one.
    pub fn open(path: &Path, table_size: u32) -> Result<Self> {
        if !path.exists() {
            return Self::create(path, table_size);
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(path, file, table_size)
    }

    /// Open an existing index for lookups only. A short file is not padded.
    pub fn open_read_only(path: &Path, table_size: u32) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(path, file, table_size)
    }

    fn from_file(path: &Path, file: File, table_size: u32) -> Result<Self> {
        let len = file.metadata()?.len();

        let index = HashIndex { path: path.to_path_buf(), file, table_size, len };
        if len > index.full_len() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "index {:?} holds {} entries, configured table has {}",
                    path,
                    len / ENTRY_SIZE,
                    table_size
                ),
            ));
        }
        Ok(index)
    }

    /// Create (or reset) an index with every entry NULL.
    pub fn create(path: &Path, table_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut index = HashIndex { path: path.to_path_buf(), file, table_size, len: 0 };
        index.normalize()?;
        Ok(index)
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    fn full_len(&self) -> u64 {
        self.table_size as u64 * ENTRY_SIZE
    }

    fn check_bucket(&self, bucket: usize) -> Result<()> {
        if bucket >= self.table_size as usize {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("bucket {} outside table of {}", bucket, self.table_size),
            ));
        }
        Ok(())
    }

    pub fn get_head(&mut self, bucket: usize) -> Result<Option<Address>> {
        self.check_bucket(bucket)?;
        let pos = bucket as u64 * ENTRY_SIZE;
        if pos + ENTRY_SIZE > self.len {
            return Ok(None);
        }

        let mut buf = [0u8; ENTRY_SIZE as usize];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buf)?;
        decode_entry(bucket, buf)
    }

    /// Write exactly one entry at `bucket * 8`.
    pub fn set_head(&mut self, bucket: usize, head: Option<Address>) -> Result<()> {
        self.check_bucket(bucket)?;
        if self.len < self.full_len() {
            self.normalize()?;
        }

        self.file.seek(SeekFrom::Start(bucket as u64 * ENTRY_SIZE))?;
        self.file.write_all(&Address::to_raw(head).to_ne_bytes())?;
        Ok(())
    }

    /// Read every entry at once. Missing trailing entries come back as `None`.
    pub fn load_all(&mut self) -> Result<Vec<Option<Address>>> {
        let mut raw = Vec::with_capacity(self.len as usize);
        let full = self.full_len();
        self.file.seek(SeekFrom::Start(0))?;
        (&mut self.file).take(full).read_to_end(&mut raw)?;

        let mut heads = vec![None; self.table_size as usize];
        for (bucket, chunk) in raw.chunks_exact(ENTRY_SIZE as usize).enumerate() {
            let mut buf = [0u8; ENTRY_SIZE as usize];
            buf.copy_from_slice(chunk);
            heads[bucket] = decode_entry(bucket, buf)?;
        }
        Ok(heads)
    }

    /// Replace the whole table in one sequential write.
    pub fn store_all(&mut self, heads: &[Option<Address>]) -> Result<()> {
        if heads.len() != self.table_size as usize {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("{} heads for a table of {}", heads.len(), self.table_size),
            ));
        }

        self.file.seek(SeekFrom::Start(0))?;
        let mut writer = BufWriter::new(&mut self.file);
        for head in heads {
            writer.write_all(&Address::to_raw(*head).to_ne_bytes())?;
        }
        writer.flush()?;
        drop(writer);

        self.file.set_len(self.full_len())?;
        self.len = self.full_len();
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    // Pad the file with NULL entries up to full length. A partial trailing
    // entry is overwritten.
    fn normalize(&mut self) -> Result<()> {
        let start = self.len - self.len % ENTRY_SIZE;
        if start >= self.full_len() {
            return Ok(());
        }
        let missing = ((self.full_len() - start) / ENTRY_SIZE) as usize;

        self.file.seek(SeekFrom::Start(start))?;
        let mut writer = BufWriter::new(&mut self.file);
        let null = NULL_OFFSET.to_ne_bytes();
        for _ in 0..missing {
            writer.write_all(&null)?;
        }
        writer.flush()?;
        drop(writer);

        self.len = self.full_len();
        Ok(())
    }
}

fn decode_entry(bucket: usize, buf: [u8; ENTRY_SIZE as usize]) -> Result<Option<Address>> {
    let raw = i64::from_ne_bytes(buf);
    Address::from_raw(raw).map_err(|_| {
        Error::new(
            ErrorKind::OutOfRange,
            format!("bucket {} holds invalid head {}", bucket, raw),
        )
    })
}

use serde::Serialize;
use tracing::warn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Address, Record, RECORD_SIZE};
use crate::storage::record_store::RecordStore;

/// Random-access reads over a record store.
pub trait RecordSource {
    fn read_record(&mut self, at: Address) -> Result<Record>;
    fn store_len(&mut self) -> Result<u64>;
}

/// A record source that can also grow.
pub trait RecordSink: RecordSource {
    fn append_record(&mut self, record: &Record) -> Result<Address>;
}

impl RecordSource for RecordStore {
    fn read_record(&mut self, at: Address) -> Result<Record> {
        self.read(at)
    }

    fn store_len(&mut self) -> Result<u64> {
        Ok(self.len())
    }
}

impl RecordSink for RecordStore {
    fn append_record(&mut self, record: &Record) -> Result<Address> {
        self.append(record)
    }
}

/// Records of one chain in traversal order (newest first).
#[derive(Debug, Default)]
pub struct ChainWalk {
    pub nodes: Vec<(Address, Record)>,
    /// Set when a link could not be followed; `nodes` holds the prefix read so far.
    pub broken: Option<Error>,
}

/// One search match. `occurrence` counts matches in traversal order from 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub address: Address,
    pub occurrence: usize,
    pub record: Record,
}

#[derive(Debug, Default)]
pub struct SearchResults {
    pub hits: Vec<Hit>,
    /// Chain was cut short by a bad link; `hits` covers the readable prefix.
    pub truncated: Option<Error>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.hits.iter().map(|h| &h.record)
    }
}

/// Outcome of a chain rewrite after a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rewrite {
    pub new_head: Option<Address>,
    pub removed: usize,
    pub retained: usize,
}

/// Follow successor pointers from `head` until the end of the chain.
///
/// Bad links (out of bounds, short reads, undecodable bytes, cycles) stop the
/// walk and are reported in `broken`; only I/O failures become `Err`.
pub fn walk<S: RecordSource>(src: &mut S, bucket: usize, head: Option<Address>) -> Result<ChainWalk> {
    let mut out = ChainWalk::default();
    let mut cursor = head;
    // No chain can be longer than the store
    let limit = src.store_len()? / RECORD_SIZE as u64;

    while let Some(at) = cursor {
        match src.read_record(at) {
            Ok(_) if out.nodes.len() as u64 >= limit => {
                out.broken = Some(corrupt(bucket, at, "chain loops back on itself"));
                break;
            }
            Ok(record) => {
                cursor = record.next;
                out.nodes.push((at, record));
            }
            Err(e) if e.kind == ErrorKind::Io => return Err(e),
            Err(e) => {
                out.broken = Some(corrupt(bucket, at, &e.context));
                break;
            }
        }
    }

    if let Some(err) = &out.broken {
        warn!(bucket, read = out.nodes.len(), "chain truncated: {}", err.context);
    }
    Ok(out)
}

fn corrupt(bucket: usize, at: Address, why: &str) -> Error {
    Error::new(
        ErrorKind::CorruptChain,
        format!("bucket {} at offset {}: {}", bucket, at, why),
    )
}

/// Every record in the chain whose identifier is `id`, most recent first.
pub fn search<S: RecordSource>(
    src: &mut S,
    bucket: usize,
    head: Option<Address>,
    id: i32,
) -> Result<SearchResults> {
    let chain = walk(src, bucket, head)?;

    let hits = chain
        .nodes
        .into_iter()
        .filter(|(_, record)| record.id == id)
        .enumerate()
        .map(|(occurrence, (address, record))| Hit { address, occurrence, record })
        .collect();

    Ok(SearchResults { hits, truncated: chain.broken })
}

/// Prepend `record` to the chain starting at `head`. The caller publishes the
/// returned address as the new head.
pub fn insert<S: RecordSink>(sink: &mut S, head: Option<Address>, mut record: Record) -> Result<Address> {
    record.next = head;
    sink.append_record(&record)
}

/// Append `chain` (traversal order, newest first) as a fresh run of records,
/// oldest first, each pointing at the one written before it. Returns the new
/// head, which is the originally newest record.
pub fn relink<S: RecordSink>(sink: &mut S, chain: Vec<Record>) -> Result<Option<Address>> {
    let mut head = None;
    for mut record in chain.into_iter().rev() {
        record.next = head;
        head = Some(sink.append_record(&record)?);
    }
    Ok(head)
}

/// Non-destructive delete: re-append every record `keep` accepts as a new
/// chain. Nothing is written when `keep` accepts everything.
fn rewrite_where<S, F>(
    sink: &mut S,
    bucket: usize,
    head: Option<Address>,
    mut keep: F,
) -> Result<Rewrite>
where
    S: RecordSink,
    F: FnMut(&Record) -> bool,
{
    let chain = walk(sink, bucket, head)?;
    if let Some(err) = chain.broken {
        return Err(err);
    }

    let total = chain.nodes.len();
    let retained: Vec<Record> = chain
        .nodes
        .into_iter()
        .map(|(_, record)| record)
        .filter(|record| keep(record))
        .collect();

    let removed = total - retained.len();
    if removed == 0 {
        return Ok(Rewrite { new_head: head, removed, retained: total });
    }

    let count = retained.len();
    let new_head = relink(sink, retained)?;
    Ok(Rewrite { new_head, removed, retained: count })
}

/// Unlink every record for `id`.
pub fn delete_all<S: RecordSink>(
    sink: &mut S,
    bucket: usize,
    head: Option<Address>,
    id: i32,
) -> Result<Rewrite> {
    rewrite_where(sink, bucket, head, |record| record.id != id)
}

/// Unlink the `occurrence`-th match (0-based, traversal order) for `id`.
pub fn delete_one<S: RecordSink>(
    sink: &mut S,
    bucket: usize,
    head: Option<Address>,
    id: i32,
    occurrence: usize,
) -> Result<Rewrite> {
    let mut seen = 0usize;
    let rewrite = rewrite_where(sink, bucket, head, |record| {
        if record.id != id {
            return true;
        }
        let this = seen;
        seen += 1;
        this != occurrence
    })?;

    if rewrite.removed == 0 {
        return Err(Error::new(
            ErrorKind::IndexOutOfRange,
            format!(
                "identifier {} has {} record(s), occurrence {} requested",
                id, seen, occurrence
            ),
        ));
    }
    Ok(rewrite)
}

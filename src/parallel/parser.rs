use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{
    Record, DATE_WIDTH, FIRST_NAME_WIDTH, LAST_NAME_WIDTH, PRACTITIONER_WIDTH,
    PRESCRIPTION_WIDTH, REASON_WIDTH, RESULTS_WIDTH, TESTS_WIDTH,
};
use crate::storage::codec::fit_text;

const FIELD_COUNT: usize = 10;

/// Parse one input line into a record.
///
/// Fields are comma separated in layout order; the last field (prescription)
/// takes the rest of the line, commas included. Text is truncated to fit.
/// An empty numeric field reads as 0.
pub fn parse_line(line: &str) -> Result<Record> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.splitn(FIELD_COUNT, ',').collect();
    if fields.len() < FIELD_COUNT {
        return Err(Error::new(
            ErrorKind::Format,
            format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
        ));
    }

    Ok(Record {
        date: fit_text(fields[0], DATE_WIDTH),
        id: parse_int("identifier", fields[1])?,
        first_name: fit_text(fields[2], FIRST_NAME_WIDTH),
        last_name: fit_text(fields[3], LAST_NAME_WIDTH),
        age: parse_int("age", fields[4])?,
        practitioner: fit_text(fields[5], PRACTITIONER_WIDTH),
        reason: fit_text(fields[6], REASON_WIDTH),
        tests: fit_text(fields[7], TESTS_WIDTH),
        results: fit_text(fields[8], RESULTS_WIDTH),
        prescription: fit_text(fields[9], PRESCRIPTION_WIDTH),
        next: None,
    })
}

fn parse_int(name: &str, raw: &str) -> Result<i32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<i32>().map_err(|e| {
        Error::new(ErrorKind::Format, format!("{} '{}': {}", name, raw, e))
    })
}

/// Data lines of one input file: header dropped, blank lines skipped.
///
/// Lines are read as raw bytes; anything that is not UTF-8 (Latin-1 exports)
/// is decoded lossily so one odd byte never costs the rest of the file.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    let mut header = true;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if std::mem::take(&mut header) {
            continue;
        }
        let line = String::from_utf8_lossy(&buf);
        if !line.trim().is_empty() {
            lines.push(line.into_owned());
        }
    }
    Ok(lines)
}

/// Parsed records of one batch in input order, plus how many lines were rejected.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<Record>,
    pub malformed: usize,
}

/// Parses lines on a private rayon pool. Lines are independent, so the work is
/// split freely across threads; output order still follows input order.
pub struct ParallelParser {
    pool: rayon::ThreadPool,
    pub progress: Arc<AtomicUsize>,
}

impl ParallelParser {
    /// `threads == 0` lets rayon pick.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::new(ErrorKind::Io, format!("parser pool: {}", e)))?;

        Ok(ParallelParser {
            pool,
            progress: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Lines parsed so far across all batches
    pub fn get_progress(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn parse_batch(&self, lines: &[String]) -> ParsedBatch {
        let parsed: Vec<Option<Record>> = self.pool.install(|| {
            lines
                .par_iter()
                .map(|line| {
                    self.progress.fetch_add(1, Ordering::Relaxed);
                    parse_line(line).ok()
                })
                .collect()
        });

        let mut batch = ParsedBatch {
            records: Vec::with_capacity(parsed.len()),
            malformed: 0,
        };
        for record in parsed {
            match record {
                Some(r) => batch.records.push(r),
                None => batch.malformed += 1,
            }
        }
        batch
    }
}

//! Fixed-width binary layout of one record.
//!
//! ```text
//! [ date 11 ][ id 4 ][ first 25 ][ last 25 ][ age 4 ][ practitioner 40 ]
//! [ reason 50 ][ tests 50 ][ results 30 ][ prescription 60 ][ next 8 ]
//! ```
//!
//! No padding between fields. Integers are written in host byte order, so a
//! store is only portable between machines of the same architecture.

use crate::core::error::{Error, Result};
use crate::core::types::{
    Address, Record, AGE_WIDTH, DATE_WIDTH, FIRST_NAME_WIDTH, ID_WIDTH, LAST_NAME_WIDTH,
    LINK_WIDTH, PRACTITIONER_WIDTH, PRESCRIPTION_WIDTH, REASON_WIDTH, RECORD_SIZE,
    RESULTS_WIDTH, TESTS_WIDTH,
};

/// Byte offset of the successor pointer inside an encoded record.
pub const LINK_OFFSET: usize = RECORD_SIZE - LINK_WIDTH;

struct Writer<'a> {
    buf: &'a mut [u8; RECORD_SIZE],
    pos: usize,
}

impl Writer<'_> {
    fn text(&mut self, name: &str, value: &str, width: usize) -> Result<()> {
        let bytes = value.as_bytes();
        if bytes.len() >= width {
            return Err(Error::format(format!(
                "{} is {} bytes, at most {} fit",
                name,
                bytes.len(),
                width - 1
            )));
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        // remainder is already zeroed
        self.pos += width;
        Ok(())
    }

    fn bytes<const N: usize>(&mut self, value: [u8; N]) {
        self.buf[self.pos..self.pos + N].copy_from_slice(&value);
        self.pos += N;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, width: usize) -> &[u8] {
        let slice = &self.buf[self.pos..self.pos + width];
        self.pos += width;
        slice
    }

    fn text(&mut self, width: usize) -> String {
        let raw = self.take(width);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        out
    }
}

/// Encode a record into exactly `RECORD_SIZE` bytes. Over-wide text is rejected.
pub fn encode(record: &Record) -> Result<[u8; RECORD_SIZE]> {
    let mut buf = [0u8; RECORD_SIZE];
    let mut w = Writer { buf: &mut buf, pos: 0 };

    w.text("date", &record.date, DATE_WIDTH)?;
    w.bytes::<ID_WIDTH>(record.id.to_ne_bytes());
    w.text("first_name", &record.first_name, FIRST_NAME_WIDTH)?;
    w.text("last_name", &record.last_name, LAST_NAME_WIDTH)?;
    w.bytes::<AGE_WIDTH>(record.age.to_ne_bytes());
    w.text("practitioner", &record.practitioner, PRACTITIONER_WIDTH)?;
    w.text("reason", &record.reason, REASON_WIDTH)?;
    w.text("tests", &record.tests, TESTS_WIDTH)?;
    w.text("results", &record.results, RESULTS_WIDTH)?;
    w.text("prescription", &record.prescription, PRESCRIPTION_WIDTH)?;
    w.bytes::<LINK_WIDTH>(Address::to_raw(record.next).to_ne_bytes());

    debug_assert_eq!(w.pos, RECORD_SIZE);
    Ok(buf)
}

/// Decode the first `RECORD_SIZE` bytes of `buf`.
pub fn decode(buf: &[u8]) -> Result<Record> {
    if buf.len() < RECORD_SIZE {
        return Err(Error::format(format!(
            "record buffer is {} bytes, need {}",
            buf.len(),
            RECORD_SIZE
        )));
    }
    let mut r = Reader { buf, pos: 0 };

    let date = r.text(DATE_WIDTH);
    let id = i32::from_ne_bytes(r.array::<ID_WIDTH>());
    let first_name = r.text(FIRST_NAME_WIDTH);
    let last_name = r.text(LAST_NAME_WIDTH);
    let age = i32::from_ne_bytes(r.array::<AGE_WIDTH>());
    let practitioner = r.text(PRACTITIONER_WIDTH);
    let reason = r.text(REASON_WIDTH);
    let tests = r.text(TESTS_WIDTH);
    let results = r.text(RESULTS_WIDTH);
    let prescription = r.text(PRESCRIPTION_WIDTH);
    let raw_next = i64::from_ne_bytes(r.array::<LINK_WIDTH>());
    let next = Address::from_raw(raw_next)
        .map_err(|_| Error::format(format!("invalid successor pointer {}", raw_next)))?;

    Ok(Record {
        date,
        id,
        first_name,
        last_name,
        age,
        practitioner,
        reason,
        tests,
        results,
        prescription,
        next,
    })
}

/// Cut `value` down to what a `width`-byte field holds, on a char boundary.
pub fn fit_text(value: &str, width: usize) -> String {
    let max = width - 1;
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

use std::fmt;
use chrono::NaiveDate;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Default bucket count of the hash index (power of two).
pub const TABLE_SIZE: u32 = 131072;

/// On-disk sentinel for "no record" in successor pointers and bucket entries.
pub const NULL_OFFSET: i64 = -1;

/// Width in bytes of one bucket entry in the index file.
pub const ENTRY_SIZE: u64 = 8;

// Field widths in layout order. Text fields hold at most `width - 1` bytes
// followed by NUL padding.
pub const DATE_WIDTH: usize = 11;
pub const ID_WIDTH: usize = 4;
pub const FIRST_NAME_WIDTH: usize = 25;
pub const LAST_NAME_WIDTH: usize = 25;
pub const AGE_WIDTH: usize = 4;
pub const PRACTITIONER_WIDTH: usize = 40;
pub const REASON_WIDTH: usize = 50;
pub const TESTS_WIDTH: usize = 50;
pub const RESULTS_WIDTH: usize = 30;
pub const PRESCRIPTION_WIDTH: usize = 60;
pub const LINK_WIDTH: usize = 8;

pub const FIELD_WIDTHS: [usize; 11] = [
    DATE_WIDTH,
    ID_WIDTH,
    FIRST_NAME_WIDTH,
    LAST_NAME_WIDTH,
    AGE_WIDTH,
    PRACTITIONER_WIDTH,
    REASON_WIDTH,
    TESTS_WIDTH,
    RESULTS_WIDTH,
    PRESCRIPTION_WIDTH,
    LINK_WIDTH,
];

/// Encoded size of one record.
pub const RECORD_SIZE: usize = {
    let mut total = 0;
    let mut i = 0;
    while i < FIELD_WIDTHS.len() {
        total += FIELD_WIDTHS[i];
        i += 1;
    }
    total
};

const _: () = assert!(RECORD_SIZE == 307);

/// Bucket of an identifier: its low-order bits, no mixing.
pub fn bucket_of(id: i32, table_size: u32) -> usize {
    debug_assert!(table_size.is_power_of_two());
    ((id as u32) & (table_size - 1)) as usize
}

/// Logical address of a record: its byte offset in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    pub const ZERO: Address = Address(0);

    pub fn new(offset: u64) -> Self {
        Address(offset)
    }

    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Decode an on-disk link. `-1` is end of chain; any other negative
    /// value is not a valid address.
    pub fn from_raw(raw: i64) -> Result<Option<Address>> {
        match raw {
            NULL_OFFSET => Ok(None),
            r if r < 0 => Err(Error::new(
                ErrorKind::OutOfRange,
                format!("negative record offset {}", r),
            )),
            r => Ok(Some(Address(r as u64))),
        }
    }

    pub fn to_raw(link: Option<Address>) -> i64 {
        link.map(|a| a.0 as i64).unwrap_or(NULL_OFFSET)
    }

    /// Address of the record slot directly after this one.
    pub fn following(&self) -> Address {
        Address(self.0 + RECORD_SIZE as u64)
    }

    /// Bounds check against the current store length.
    pub fn check(&self, store_len: u64) -> Result<()> {
        match self.0.checked_add(RECORD_SIZE as u64) {
            Some(end) if end <= store_len => Ok(()),
            _ => Err(Error::new(
                ErrorKind::OutOfRange,
                format!("offset {} outside store of {} bytes", self.0, store_len),
            )),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One clinical visit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    pub date: String,
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub practitioner: String,
    pub reason: String,
    pub tests: String,
    pub results: String,
    pub prescription: String,
    #[serde(skip)]
    pub next: Option<Address>,
}

impl Record {
    pub fn new(id: i32) -> Self {
        Record {
            id,
            ..Default::default()
        }
    }

    /// The text fields paired with their declared widths, in layout order.
    pub fn text_fields(&self) -> [(&'static str, &str, usize); 8] {
        [
            ("date", &self.date, DATE_WIDTH),
            ("first_name", &self.first_name, FIRST_NAME_WIDTH),
            ("last_name", &self.last_name, LAST_NAME_WIDTH),
            ("practitioner", &self.practitioner, PRACTITIONER_WIDTH),
            ("reason", &self.reason, REASON_WIDTH),
            ("tests", &self.tests, TESTS_WIDTH),
            ("results", &self.results, RESULTS_WIDTH),
            ("prescription", &self.prescription, PRESCRIPTION_WIDTH),
        ]
    }

    /// Checks applied to interactively entered records.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::new(ErrorKind::InvalidArgument, msg));

        if self.date.len() != DATE_WIDTH - 1
            || NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").is_err()
        {
            return invalid(format!("date '{}' is not YYYY-MM-DD", self.date));
        }
        if self.id <= 0 {
            return invalid(format!("identifier {} must be positive", self.id));
        }
        if !(0..=120).contains(&self.age) {
            return invalid(format!("age {} outside 0..=120", self.age));
        }
        for (name, value, width) in self.text_fields() {
            if value.is_empty() || value.len() >= width {
                return invalid(format!(
                    "{} must be 1..{} bytes, got {}",
                    name,
                    width - 1,
                    value.len()
                ));
            }
        }
        Ok(())
    }
}

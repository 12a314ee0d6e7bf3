use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    /// Field too wide or buffer too short while encoding/decoding a record
    Format,
    /// Offset points outside the current store bounds
    OutOfRange,
    /// Fewer bytes than a full record came back from the store
    CorruptRead,
    /// A chain link could not be followed; traversal stopped early
    CorruptChain,
    /// Delete-by-occurrence index exceeds the number of matches
    IndexOutOfRange,
    /// Required file could not be opened or created
    InitializationFailure,
    /// A bulk-load participant failed; the whole job is abandoned
    DistributedAbort,
    /// Another handle already owns the store
    Locked,
    InvalidArgument,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Errors after which the process (or bulk-load job) cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InitializationFailure | ErrorKind::DistributedAbort
        )
    }

    pub(crate) fn format(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Format, context.into())
    }

    pub(crate) fn init(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InitializationFailure, context.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

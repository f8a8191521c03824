use std::io;
use std::sync::PoisonError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    CorruptedLog(String),
    LockPoisoned,
    Closed,
    NotFound(String),
    Decode(String),
    Encode(String),
    RankNotFound(String),
    // A single package's fetch failed upstream
    Upstream { package: String, message: String },
    // The collector itself failed; the whole round is lost
    Collector(String),
    InvalidInput(String),
    TaskJoin(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::CorruptedLog(msg) => write!(f, "Corrupted log: {}", msg),
            Error::LockPoisoned => write!(f, "Lock was poisoned"),
            Error::Closed => write!(f, "Store is closed"),
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::Decode(msg) => write!(f, "Failed to decode {}", msg),
            Error::Encode(msg) => write!(f, "Failed to encode {}", msg),
            Error::RankNotFound(package) => write!(f, "No rank for package ({}) found", package),
            Error::Upstream { package, message } => {
                write!(f, "Upstream error for package {}: {}", package, message)
            }
            Error::Collector(msg) => write!(f, "Collector failed: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::TaskJoin(msg) => write!(f, "Task join error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

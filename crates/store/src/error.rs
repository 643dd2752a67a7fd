use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    InvalidHmacKeyLength(usize),
    BounceSuffixedAddress,
    BatchTooLarge { got: usize, limit: usize },
    Sqlite(rusqlite::Error),
    Pool(r2d2::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "not found"),
            StoreError::InvalidHmacKeyLength(n) => write!(f, "hmac key must be 32 bytes, got {n}"),
            StoreError::BounceSuffixedAddress => write!(f, "list address local part ends with the bounce suffix"),
            StoreError::BatchTooLarge { got, limit } => write!(f, "batch of {got} exceeds limit of {limit}"),
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StoreError::Pool(e) => write!(f, "connection pool error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e)
    }
}

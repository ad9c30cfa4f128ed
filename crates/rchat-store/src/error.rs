use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Conflicting record")]
    Conflict,

    #[error("Storage is full")]
    StorageFull,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Blob content does not match its hash: {hash}")]
    HashMismatch { hash: String },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict
            }
            // SQLITE_FULL covers both a full database (max page count)
            // and the VFS running out of disk space.
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DiskFull =>
            {
                StoreError::StorageFull
            }
            other => StoreError::Sqlite(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn disk_full_maps_to_storage_full() {
        let err: StoreError = sqlite_failure(rusqlite::ffi::SQLITE_FULL).into();
        assert!(matches!(err, StoreError::StorageFull));
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let err: StoreError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).into();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn other_failures_stay_wrapped() {
        let err: StoreError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY).into();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}

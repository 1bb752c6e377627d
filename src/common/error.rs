use thiserror::Error;

use super::types::PageId;

/// Storage core error types.
///
/// Expected outcomes (duplicate key, missing key, non-resident page) are
/// expressed through `bool`/`Option` return values, not errors; this enum
/// covers resource exhaustion, invariant breaches and I/O failures.
#[derive(Error, Debug)]
pub enum SiltError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    Scheduler(String),

    #[error("Header page has no room for another index record")]
    HeaderFull,

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, SiltError>;

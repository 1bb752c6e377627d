/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Page 0 holds the index-name to root-page-id catalog
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default bucket capacity for the extendible hash page table
pub const DEFAULT_BUCKET_SIZE: usize = 4;

use super::types::PageId;

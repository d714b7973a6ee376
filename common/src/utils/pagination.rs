use serde::Serialize;

/// Page metadata returned alongside public listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total: usize, page_len: usize) -> Self {
        let limit = limit.max(1);
        let total_pages = total.div_ceil(limit);
        let consumed = offset_for(page, limit).saturating_add(page_len);

        Self {
            page,
            limit,
            total,
            total_pages,
            has_more: consumed < total,
        }
    }

    /// Metadata for a single page holding the whole catalog.
    pub fn everything(total: usize) -> Self {
        Self {
            page: 1,
            limit: total,
            total,
            total_pages: 1,
            has_more: false,
        }
    }
}

/// Number of rows to skip for a 1-based page.
pub fn offset_for(page: usize, limit: usize) -> usize {
    page.max(1).saturating_sub(1).saturating_mul(limit)
}

//! Pagination arithmetic
//!
//! A `Pagination` is created per request, initialised from the requested
//! page and limit, then completed with the record count. Offset and page
//! totals are always re-derived from those inputs, never assigned.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum items per page
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Default items per page
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Pagination state for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    page: i64,
    limit: i64,
    offset: i64,
    total_records: u64,
    total_pages: u64,
}

impl Pagination {
    /// Record a requested page and limit. Nothing is clamped until `init`.
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page,
            limit,
            offset: 0,
            total_records: 0,
            total_pages: 0,
        }
    }

    /// Clamp page and limit and derive the offset.
    ///
    /// - Page is clamped to a minimum of 1
    /// - Limit is clamped to a maximum of 100
    /// - A limit below 1 is rejected
    pub fn init(&mut self, page: i64, limit: i64) -> Result<i64> {
        let page = page.max(1);
        let limit = limit.min(MAX_PAGE_LIMIT);
        if limit < 1 {
            return Err(Error::invalid_input(
                "pagination",
                format!("limit must be at least 1, got {limit}"),
            ));
        }

        self.page = page;
        self.limit = limit;
        self.offset = limit.saturating_mul(page - 1);
        self.total_pages = Self::pages_for(self.total_records, self.limit);
        Ok(self.offset)
    }

    /// Store the record count and derive the page total.
    pub fn set_total(&mut self, total_records: u64) -> u64 {
        self.total_records = total_records;
        self.total_pages = Self::pages_for(total_records, self.limit);
        self.total_pages
    }

    fn pages_for(total_records: u64, limit: i64) -> u64 {
        if limit < 1 {
            return 0;
        }
        total_records.div_ceil(limit as u64)
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Check if there's a next page.
    pub fn has_next(&self) -> bool {
        (self.page as u64) < self.total_pages
    }

    /// Check if there's a previous page.
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_LIMIT)
    }
}

/// One page of results together with its pagination state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Items for current page
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn has_next(&self) -> bool {
        self.pagination.has_next()
    }

    pub fn has_prev(&self) -> bool {
        self.pagination.has_prev()
    }
}

//! Page-number pagination for search results.
//!
//! The collection shape matches what callers already get from primary-store
//! pagination, so they need not know which store served the page.

use serde::{Deserialize, Serialize};

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number, starting at 1.
    pub page: u64,
    /// Items per page.
    pub per_page: u64,
}

impl PageRequest {
    /// Creates a page request. A page below 1 is read as page 1 and a zero
    /// page size as 1.
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    /// Offset of the first item on this page.
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results plus the numbers needed to render pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedCollection<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Total number of matching items across all pages.
    pub total_entries: u64,
    /// Page number, starting at 1.
    pub current_page: u64,
    /// Requested page size.
    pub per_page: u64,
}

impl<T> PaginatedCollection<T> {
    /// Creates a collection for a page of results.
    pub fn new(items: Vec<T>, total_entries: u64, request: PageRequest) -> Self {
        Self {
            items,
            total_entries,
            current_page: request.page,
            per_page: request.per_page,
        }
    }

    /// Number of pages needed for all entries.
    pub fn total_pages(&self) -> u64 {
        self.total_entries.div_ceil(self.per_page.max(1))
    }

    /// The previous page number, if any.
    pub fn previous_page(&self) -> Option<u64> {
        (self.current_page > 1).then(|| self.current_page - 1)
    }

    /// The next page number, if any.
    pub fn next_page(&self) -> Option<u64> {
        (self.current_page < self.total_pages()).then(|| self.current_page + 1)
    }

    /// True if the requested page lies beyond the last page.
    pub fn out_of_bounds(&self) -> bool {
        self.current_page > self.total_pages().max(1)
    }

    /// Offset of the first item on this page.
    pub fn offset(&self) -> u64 {
        PageRequest::new(self.current_page, self.per_page).offset()
    }

    /// Returns true if this page has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Maps the items to a different type.
    pub fn map<U, F>(self, f: F) -> PaginatedCollection<U>
    where
        F: FnMut(T) -> U,
    {
        PaginatedCollection {
            items: self.items.into_iter().map(f).collect(),
            total_entries: self.total_entries,
            current_page: self.current_page,
            per_page: self.per_page,
        }
    }
}

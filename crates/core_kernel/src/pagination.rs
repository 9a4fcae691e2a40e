//! Pagination types for list and statement queries.

use serde::{Deserialize, Serialize};

/// Largest page size a caller may request
pub const MAX_PAGE_SIZE: u32 = 500;

/// Request parameters for paginated queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number (1-indexed).
    #[serde(default = "default_page")]
    pub page: u32,
    /// Number of items per page.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageRequest {
    /// Creates a request, clamping the page to at least 1 and the size to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Calculates the offset for queries.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }

    /// Returns the limit for queries.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.per_page.clamp(1, MAX_PAGE_SIZE)
    }

    /// Slices an already materialized, ordered collection.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        items
            .iter()
            .skip(offset)
            .take(self.limit() as usize)
            .cloned()
            .collect()
    }
}

/// One page of results plus totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items in the current page.
    pub items: Vec<T>,
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total number of items across all pages.
    pub total: u64,
}

impl<T> Page<T> {
    /// Creates a page for the given request.
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            page: request.page.max(1),
            per_page: request.limit(),
            total,
        }
    }

    /// Total number of pages (at least 1).
    #[must_use]
    pub fn total_pages(&self) -> u32 {
        if self.total == 0 {
            return 1;
        }
        let per_page = u64::from(self.per_page.max(1));
        u32::try_from(self.total.div_ceil(per_page)).unwrap_or(u32::MAX)
    }

    /// Returns true when more pages follow this one.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_slice() {
        let request = PageRequest::new(2, 2);
        assert_eq!(request.offset(), 2);
        assert_eq!(request.slice(&[1, 2, 3, 4, 5]), vec![3, 4]);
    }

    #[test]
    fn test_total_pages() {
        let page: Page<u8> = Page::new(vec![], PageRequest::new(1, 20), 41);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let empty: Page<u8> = Page::new(vec![], PageRequest::default(), 0);
        assert_eq!(empty.total_pages(), 1);
        assert!(!empty.has_next());
    }
}

//! Search and pagination types
//!
//! The portal's session and user lists are searched with a keyword, a
//! filter and a page window. This module holds the request/response
//! contract and the pure pagination arithmetic; the HTTP side lives in
//! [`crate::portal::search`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod records;

pub use records::{SessionRecord, UserRecord};

/// Number of page links shown around the current page
pub const PAGE_LINK_WINDOW: u32 = 5;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Page numbers start at 1")]
    InvalidPage,

    #[error("Page size must be greater than zero")]
    InvalidPageSize,
}

/// One search query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub keyword: String,
    pub page: u32,
    pub filter: String,
    pub page_size: u32,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            page: 1,
            filter: filter.into(),
            page_size: 10,
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.page == 0 {
            return Err(SearchError::InvalidPage);
        }
        if self.page_size == 0 {
            return Err(SearchError::InvalidPageSize);
        }
        Ok(())
    }
}

/// One page of results.
///
/// Accepts the portal's list-specific field names (`sessions`, `users`,
/// `totalSessions`, `isSuperUser`) as aliases of the generic ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage<T> {
    #[serde(alias = "sessions", alias = "users")]
    pub items: Vec<T>,
    pub page: u32,
    pub pages: u32,
    #[serde(default, alias = "totalSessions", alias = "totalUsers")]
    pub total_count: Option<u64>,
    #[serde(default, alias = "isSuperUser")]
    pub caller_is_privileged: bool,
}

impl<T> SearchPage<T> {
    /// The "showing X to Y of Z" line for this page
    pub fn range(&self, page_size: u32) -> PageRange {
        PageRange::compute(
            self.page,
            page_size,
            self.items.len(),
            self.total_count.unwrap_or(self.items.len() as u64),
        )
    }

    pub fn links(&self) -> PageLinks {
        PageLinks::around(self.page, self.pages)
    }
}

/// Visible record range of a page (1-based, inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl PageRange {
    pub fn compute(page: u32, page_size: u32, item_count: usize, total: u64) -> Self {
        if item_count == 0 {
            return Self {
                start: 0,
                end: 0,
                total: 0,
            };
        }
        let offset = u64::from(page_size) * u64::from(page.saturating_sub(1));
        Self {
            start: offset + 1,
            end: offset + item_count as u64,
            total,
        }
    }
}

/// Pagination links around the current page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    pub previous: Option<u32>,
    pub pages: Vec<u32>,
    pub next: Option<u32>,
}

impl PageLinks {
    pub fn around(page: u32, pages: u32) -> Self {
        if pages <= 1 {
            return Self {
                previous: None,
                pages: Vec::new(),
                next: None,
            };
        }
        let page = page.clamp(1, pages);
        let window = PAGE_LINK_WINDOW.min(pages);
        let first = page
            .saturating_sub(window / 2)
            .max(1)
            .min(pages - window + 1);

        Self {
            previous: (page > 1).then(|| page - 1),
            pages: (first..first + window).collect(),
            next: (page < pages).then(|| page + 1),
        }
    }
}

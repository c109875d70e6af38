//! Pagination metadata and page queries.
//!
//! The server owns paging: [`PaginationMeta`] is whatever the server
//! reported and is never recomputed locally. [`PageQuery`] is what a screen
//! asks for, sourced from URL query parameters when present so that
//! back/forward navigation and reloads keep the same page.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::Record;

/// Query parameter carrying the 1-based page number.
pub const CURRENT_PARAM: &str = "current";
/// Query parameter carrying the page size.
pub const PAGE_SIZE_PARAM: &str = "pageSize";
/// Query parameter carrying the free-text search.
pub const SEARCH_PARAM: &str = "q";

fn is_reserved(key: &str) -> bool {
    matches!(key, CURRENT_PARAM | PAGE_SIZE_PARAM | SEARCH_PARAM)
}

/// Server-reported paging state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    /// 1-based page number of this page.
    pub current: u32,
    /// Number of records per page.
    pub page_size: u32,
    /// Total number of records across all pages.
    #[serde(default)]
    pub total: u64,
    /// Total number of pages.
    #[serde(default)]
    pub pages: u32,
}

impl PaginationMeta {
    /// Check `current >= 1` and `page_size >= 1`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Envelope`] naming the offending field.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.current == 0 {
            return Err(StoreError::Envelope("meta.current must be >= 1".into()));
        }
        if self.page_size == 0 {
            return Err(StoreError::Envelope("meta.pageSize must be >= 1".into()));
        }
        Ok(())
    }
}

/// One page of records together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Records in server order.
    pub items: Vec<Record>,
    /// Paging state reported alongside the records.
    pub meta: PaginationMeta,
}

/// Parameters for a list request.
///
/// # Examples
///
/// ```
/// use hrm_client::PageQuery;
///
/// let query = PageQuery::new(2, 20)
///     .unwrap()
///     .with_search("ana")
///     .with_filter("departmentId", "d-7");
/// let pairs = query.to_pairs();
/// assert!(pairs.contains(&("current".to_string(), "2".to_string())));
/// assert!(pairs.contains(&("q".to_string(), "ana".to_string())));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    current: u32,
    page_size: u32,
    search: Option<String>,
    filters: BTreeMap<String, String>,
}

impl PageQuery {
    /// Create a query for page `current` of size `page_size`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuery`] if either value is zero.
    pub fn new(current: u32, page_size: u32) -> Result<Self, StoreError> {
        if current == 0 {
            return Err(StoreError::InvalidQuery("current must be >= 1".into()));
        }
        if page_size == 0 {
            return Err(StoreError::InvalidQuery("pageSize must be >= 1".into()));
        }
        Ok(Self {
            current,
            page_size,
            search: None,
            filters: BTreeMap::new(),
        })
    }

    /// First page with the given size, clamping a zero size to 1.
    pub fn first(page_size: u32) -> Self {
        Self {
            current: 1,
            page_size: page_size.max(1),
            search: None,
            filters: BTreeMap::new(),
        }
    }

    /// Set the free-text search. An empty string clears it.
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.search = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }

    /// Add an extra filter parameter.
    ///
    /// The paging and search keys (`current`, `pageSize`, `q`) are reserved
    /// and ignored here; use [`new`](Self::new) and
    /// [`with_search`](Self::with_search) for those.
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if is_reserved(&key) {
            tracing::warn!(key = %key, "ignoring filter on a reserved query parameter");
            return self;
        }
        self.filters.insert(key, value.into());
        self
    }

    /// Requested page number.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Requested page size.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Free-text search, if any.
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Extra filter parameters.
    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    /// Query-string pairs in the order the API expects.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (CURRENT_PARAM.to_owned(), self.current.to_string()),
            (PAGE_SIZE_PARAM.to_owned(), self.page_size.to_string()),
        ];
        if let Some(q) = &self.search {
            pairs.push((SEARCH_PARAM.to_owned(), q.clone()));
        }
        pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    /// Read `current`, `pageSize`, and `q` from a URL, falling back to
    /// `defaults` for any parameter that is missing or invalid.
    ///
    /// Filters from `defaults` are kept; other URL parameters are ignored.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL of the current screen.
    /// * `defaults` - The entity's default query.
    pub fn from_url(url: &str, defaults: &PageQuery) -> PageQuery {
        let mut query = defaults.clone();
        let Ok(parsed) = reqwest::Url::parse(url) else {
            tracing::debug!(url, "unparseable screen url, using default page query");
            return query;
        };
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                CURRENT_PARAM => {
                    if let Some(n) = parse_positive(&value) {
                        query.current = n;
                    }
                }
                PAGE_SIZE_PARAM => {
                    if let Some(n) = parse_positive(&value) {
                        query.page_size = n;
                    }
                }
                SEARCH_PARAM => query = query.with_search(value.into_owned()),
                _ => {}
            }
        }
        query
    }

    /// Write `current`, `pageSize`, and `q` into `url`, replacing any
    /// previous values and keeping unrelated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuery`] if `url` is not an absolute URL.
    pub fn write_to_url(&self, url: &str) -> Result<String, StoreError> {
        let mut parsed = reqwest::Url::parse(url)
            .map_err(|e| StoreError::InvalidQuery(format!("bad url {url}: {e}")))?;
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !matches!(k.as_ref(), CURRENT_PARAM | PAGE_SIZE_PARAM | SEARCH_PARAM))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = parsed.query_pairs_mut();
            pairs.clear();
            pairs.extend_pairs(kept);
            pairs.append_pair(CURRENT_PARAM, &self.current.to_string());
            pairs.append_pair(PAGE_SIZE_PARAM, &self.page_size.to_string());
            if let Some(q) = &self.search {
                pairs.append_pair(SEARCH_PARAM, q);
            }
        }
        Ok(parsed.to_string())
    }
}

fn parse_positive(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|n| *n >= 1)
}

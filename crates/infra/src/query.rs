//! Paging and filtering shapes shared by the stores and the orchestrator.

use serde::{Deserialize, Serialize};

use fieldwork_core::ProjectId;
use fieldwork_tasks::TaskStatus;

/// 1-based offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    /// Resolve caller-supplied values against configured limits.
    ///
    /// A missing or zero page becomes 1; a missing or zero size becomes
    /// `default_size`; sizes above `max_size` are capped.
    pub fn new(page: Option<u32>, page_size: Option<u32>, default_size: u32, max_size: u32) -> Self {
        let max_size = max_size.max(1);
        let page_size = match page_size {
            Some(0) | None => default_size,
            Some(size) => size,
        };
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(1),
            page_size: page_size.clamp(1, max_size),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching rows across all pages.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = pagination.offset() + (items.len() as u64) < total;
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            has_more: self.has_more,
        }
    }
}

/// Task listing filter. Results are always in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub project_id: Option<ProjectId>,
    pub status: Option<TaskStatus>,
    pub category: Option<String>,
    pub pagination: Pagination,
}

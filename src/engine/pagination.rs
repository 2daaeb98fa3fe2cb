//! Pagination & row count estimation

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::error::EngineResult;
use crate::engine::settings::TableSettings;
use crate::engine::types::RowData;

/// Requested page; non-positive values fall back to defaults
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageRequest {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    /// Resolves the effective window: request, then table settings, then global default
    pub fn resolve(&self, settings: &TableSettings, default_per_page: u64) -> PageWindow {
        let per_page = self
            .per_page
            .filter(|p| *p > 0)
            .or(settings.list_per_page.filter(|p| *p > 0))
            .map(|p| p as u64)
            .unwrap_or(default_per_page.max(1));
        let page = self.page.filter(|p| *p > 0).map(|p| p as u64).unwrap_or(1);

        PageWindow { page, per_page }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u64,
    pub per_page: u64,
}

impl PageWindow {
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        self.per_page
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub last_page: u64,
    pub per_page: u64,
    pub current_page: u64,
}

/// Page metadata reported by the executing query layer, if any
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportedPagination {
    pub total: Option<u64>,
    pub last_page: Option<u64>,
    pub per_page: Option<u64>,
    pub current_page: Option<u64>,
}

impl Pagination {
    pub fn compute(total: u64, window: PageWindow) -> Self {
        Self {
            total,
            last_page: total.div_ceil(window.per_page),
            per_page: window.per_page,
            current_page: window.page,
        }
    }

    /// Executor-reported fields win; the rest is filled from the estimate
    pub fn resolve(reported: ReportedPagination, total: u64, window: PageWindow) -> Self {
        let computed = Self::compute(total, window);
        Self {
            total: reported.total.unwrap_or(computed.total),
            last_page: reported.last_page.unwrap_or(computed.last_page),
            per_page: reported.per_page.unwrap_or(computed.per_page),
            current_page: reported.current_page.unwrap_or(computed.current_page),
        }
    }
}

/// Rows for one `get_rows` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub rows: Vec<RowData>,
    /// Absent for autocomplete samples
    pub pagination: Option<Pagination>,
    pub large_dataset: bool,
}

impl PageResult {
    pub fn sample(rows: Vec<RowData>) -> Self {
        Self {
            rows,
            pagination: None,
            large_dataset: false,
        }
    }
}

/// A row count and whether it is exact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCount {
    pub total: u64,
    pub exact: bool,
}

impl RowCount {
    pub fn is_large(&self, threshold: u64) -> bool {
        !self.exact || self.total >= threshold
    }
}

/// Tries the exact count within `budget`, else falls back to the estimate
///
/// The exact future is dropped on timeout, not retried. A failing estimate
/// yields zero.
pub async fn count_with_fallback<E, F, Fut>(exact: E, budget: Duration, estimate: F) -> RowCount
where
    E: Future<Output = EngineResult<u64>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<u64>>,
{
    match tokio::time::timeout(budget, exact).await {
        Ok(Ok(total)) => return RowCount { total, exact: true },
        Ok(Err(e)) => warn!(error = %e, "exact row count failed, using estimate"),
        Err(_) => warn!(budget_ms = budget.as_millis() as u64, "exact row count timed out, using estimate"),
    }

    match estimate().await {
        Ok(total) => RowCount { total, exact: false },
        Err(e) => {
            warn!(error = %e, "row count estimate failed");
            RowCount { total: 0, exact: false }
        }
    }
}

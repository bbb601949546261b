use chrono::{Datelike, Duration, Local, NaiveDate};
use tracing::info;

use crate::types::ReportPeriod;

/// First month of the organization's fiscal year (July).
pub const LEAP_MONTH: u32 = 7;

/// Lower bound of the report's year range filter.
const REPORT_YEAR_FLOOR: i32 = 2000;

pub const DEFAULT_REPORT_BASE_URL: &str = "https://dashboards.toastmasters.org";

#[derive(Debug, thiserror::Error)]
pub enum PeriodError {
    #[error("Invalid month: {0} (expected 1-12)")]
    InvalidMonth(u32),
    #[error("Date out of range: {year}-{month}")]
    OutOfRange { year: i32, month: u32 },
}

/// Last calendar day of the given month.
pub fn as_of_date(year: i32, month: u32) -> Result<NaiveDate, PeriodError> {
    if !(1..=12).contains(&month) {
        return Err(PeriodError::InvalidMonth(month));
    }

    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .map(|first| first - Duration::days(1))
        .ok_or(PeriodError::OutOfRange { year, month })
}

/// Calendar years the fiscal year containing `(year, month)` spans.
pub fn fiscal_year_span(year: i32, month: u32) -> (i32, i32) {
    if month >= LEAP_MONTH {
        (year, year + 1)
    } else {
        (year - 1, year)
    }
}

pub struct ReportUrlBuilder {
    base_url: String,
}

impl ReportUrlBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Builds the export URL using the local clock for the year range.
    pub fn build(&self, district: u32, period: ReportPeriod) -> Result<String, PeriodError> {
        self.build_at(district, period, Local::now().date_naive())
    }

    pub fn build_at(
        &self,
        district: u32,
        period: ReportPeriod,
        today: NaiveDate,
    ) -> Result<String, PeriodError> {
        let to_date = as_of_date(period.year, period.month)?;
        let (start, end) = fiscal_year_span(period.year, period.month);

        let url = format!(
            "{}/{}-{}/export.aspx?type=CSV&report=districtperformance~{}~{}~~{}-{}",
            self.base_url,
            start,
            end,
            district,
            to_date.format("%m/%d/%y"),
            REPORT_YEAR_FLOOR,
            today.year(),
        );

        info!("Built report URL for district {} ({}): {}", district, period, url);
        Ok(url)
    }
}

impl Default for ReportUrlBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_BASE_URL)
    }
}

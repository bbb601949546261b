use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fiscal::PeriodError;

/// One monthly snapshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct ReportPeriod {
    pub year: i32,
    pub month: u32,
}

#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for ReportPeriod {
    type Error = PeriodError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        ReportPeriod::new(raw.year, raw.month)
    }
}

impl ReportPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        Ok(Self { year, month })
    }
}

impl std::fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// A cleaned row of the district performance report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub district: String,
    pub division: String,
    pub area: String,
    pub club: String,
    pub club_name: String,
    pub new_members: Option<i32>,
    pub late_renewals: Option<i32>,
    pub oct_renewals: Option<i32>,
    pub apr_renewals: Option<i32>,
    pub total_renewals: Option<i32>,
    pub total_chart: Option<i32>,
    pub total_to_date: Option<i32>,
    pub distinguished_status: String,
    pub charter_suspend_date: String,
    pub charter_date: Option<NaiveDate>,
    pub suspend_date: Option<NaiveDate>,
    pub report_year: Option<i32>,
    pub report_month: Option<i32>,
    /// Columns the report carried that have no canonical name.
    pub extra_columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingTime {
    /// 0 = Monday .. 6 = Sunday
    pub day: u8,
    pub time_begin: String,
    pub time_end: String,
}

/// Facts scraped from a club's public profile page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubDetail {
    pub name: String,
    pub address: Vec<String>,
    pub district: String,
    pub division: String,
    pub area: String,
    pub meeting_time: Option<MeetingTime>,
    pub location_wgs84: Option<(f64, f64)>,
    pub location_local: Option<(f64, f64)>,
}

use chrono::NaiveDate;
use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::types::{PerformanceRecord, ReportPeriod};

/// Report header text -> canonical column name.
pub const COLUMN_MAP: &[(&str, &str)] = &[
    ("District", "district"),
    ("Division", "division"),
    ("Area", "area"),
    ("Club", "club"),
    ("Club Name", "club_name"),
    ("New", "new_members"),
    ("Late Ren.", "late_renewals"),
    ("Oct. Ren.", "oct_renewals"),
    ("Apr. Ren.", "apr_renewals"),
    ("Total Ren.", "total_renewals"),
    ("Total Chart", "total_chart"),
    ("Total to Date", "total_to_date"),
    ("Distinguished Status", "distinguished_status"),
    ("Charter Date/Suspend Date", "charter_suspend_date"),
];

const CHARTER_DATE_FORMAT: &str = "%m/%d/%y";

#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Malformed date '{token}' in '{field}': {source}")]
    MalformedDate {
        token: String,
        field: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("Malformed number '{value}' in column {column}")]
    MalformedNumber { column: String, value: String },
}

/// One CSV row as ordered `(column, raw value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

pub fn canonical_name(header: &str) -> &str {
    let header = header.trim();
    COLUMN_MAP
        .iter()
        .find(|(source, _)| *source == header)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(header)
}

/// Parses the CSV, renames known headers and drops the trailing summary row.
pub fn parse_rows(text: &str) -> Result<Vec<RawRow>, CleanError> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| canonical_name(h).to_string())
        .collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.clone(), value.trim().to_string()))
            .collect();
        rows.push(RawRow { cells });
    }

    // The export always ends with a non-data footer.
    if rows.pop().is_none() {
        warn!("Report contained no rows");
    }

    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateSlot {
    Unselected,
    Charter,
    Suspend,
}

/// Splits text like `Charter 12/01/21 Susp 03/31/23` into `(charter, suspend)` dates.
pub fn charter_or_suspend_date(
    field: Option<&str>,
) -> Result<(Option<NaiveDate>, Option<NaiveDate>), CleanError> {
    let mut charter = None;
    let mut suspend = None;

    let Some(text) = field else {
        return Ok((charter, suspend));
    };

    let mut slot = DateSlot::Unselected;
    for token in text.split_whitespace() {
        if token.eq_ignore_ascii_case("charter") {
            slot = DateSlot::Charter;
            continue;
        }
        if token.eq_ignore_ascii_case("susp") {
            slot = DateSlot::Suspend;
            continue;
        }

        let target = match slot {
            DateSlot::Unselected => continue,
            DateSlot::Charter => &mut charter,
            DateSlot::Suspend => &mut suspend,
        };

        let date = NaiveDate::parse_from_str(token, CHARTER_DATE_FORMAT).map_err(|source| {
            CleanError::MalformedDate {
                token: token.to_string(),
                field: text.to_string(),
                source,
            }
        })?;
        *target = Some(date);
    }

    Ok((charter, suspend))
}

fn parse_count(column: &str, value: &str) -> Result<Option<i32>, CleanError> {
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(n) = value.parse::<i32>() {
        return Ok(Some(n));
    }
    // Spreadsheet exports sometimes render counts as "12.0".
    match value.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() <= i32::MAX as f64 => Ok(Some(f as i32)),
        _ => Err(CleanError::MalformedNumber {
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}

fn assign(record: &mut PerformanceRecord, column: &str, value: &str) -> Result<(), CleanError> {
    match column {
        "district" => record.district = value.to_string(),
        "division" => record.division = value.to_string(),
        "area" => record.area = value.to_string(),
        "club" => record.club = value.to_string(),
        "club_name" => record.club_name = value.to_string(),
        "new_members" => record.new_members = parse_count(column, value)?,
        "late_renewals" => record.late_renewals = parse_count(column, value)?,
        "oct_renewals" => record.oct_renewals = parse_count(column, value)?,
        "apr_renewals" => record.apr_renewals = parse_count(column, value)?,
        "total_renewals" => record.total_renewals = parse_count(column, value)?,
        "total_chart" => record.total_chart = parse_count(column, value)?,
        "total_to_date" => record.total_to_date = parse_count(column, value)?,
        "distinguished_status" => record.distinguished_status = value.to_string(),
        "charter_suspend_date" => record.charter_suspend_date = value.to_string(),
        other => {
            record
                .extra_columns
                .insert(other.to_string(), value.to_string());
        }
    }
    Ok(())
}

impl TryFrom<&RawRow> for PerformanceRecord {
    type Error = CleanError;

    fn try_from(row: &RawRow) -> Result<Self, Self::Error> {
        let mut record = PerformanceRecord::default();
        for (column, value) in row.iter() {
            assign(&mut record, column, value)?;
        }

        let composite = row.get("charter_suspend_date").filter(|v| !v.is_empty());
        let (charter_date, suspend_date) = charter_or_suspend_date(composite)?;
        record.charter_date = charter_date;
        record.suspend_date = suspend_date;

        Ok(record)
    }
}

/// Turns a decoded district performance report into records.
pub fn clean(text: &str) -> Result<Vec<PerformanceRecord>, CleanError> {
    let rows = parse_rows(text)?;

    if let Some(first) = rows.first() {
        let unmapped: Vec<&str> = first
            .columns()
            .filter(|c| !COLUMN_MAP.iter().any(|(_, canonical)| canonical == c))
            .collect();
        if !unmapped.is_empty() {
            debug!("Keeping unmapped report columns: {:?}", unmapped);
        }
    }

    let records = rows
        .iter()
        .map(PerformanceRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Cleaned {} report rows", records.len());
    Ok(records)
}

/// Stamps every record with the requested period, overwriting any previous values.
pub fn stamp(mut records: Vec<PerformanceRecord>, period: ReportPeriod) -> Vec<PerformanceRecord> {
    for record in &mut records {
        record.report_year = Some(period.year);
        record.report_month = Some(period.month as i32);
    }
    records
}

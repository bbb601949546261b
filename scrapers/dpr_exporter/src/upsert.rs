use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::types::PerformanceRecord;

/// Columns written for every record, in bind order.
pub const COLUMNS: &[&str] = &[
    "district",
    "division",
    "area",
    "club",
    "club_name",
    "new_members",
    "late_renewals",
    "oct_renewals",
    "apr_renewals",
    "total_renewals",
    "total_chart",
    "total_to_date",
    "distinguished_status",
    "charter_suspend_date",
    "charter_date",
    "suspend_date",
    "report_year",
    "report_month",
    "extra_columns",
];

// Postgres caps a statement at 65535 bind parameters.
const ROWS_PER_STATEMENT: usize = 1000;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid identifier regex")
});

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("Record for club '{club}' is missing key field {field}")]
    MissingKey { club: String, field: &'static str },
    #[error("Club '{club}' of district {district} appears more than once for {year}-{month:02}")]
    DuplicateKey {
        district: String,
        club: String,
        year: i32,
        month: i32,
    },
}

/// Where and how a batch is upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertTarget {
    pub table: String,
    pub constraint: String,
    /// Columns set to a SQL expression on conflict instead of the incoming value.
    pub extra_set: Vec<(String, String)>,
}

impl UpsertTarget {
    pub fn new(table: &str, constraint: &str) -> Self {
        Self {
            table: table.to_string(),
            constraint: constraint.to_string(),
            extra_set: vec![("updated_at".to_string(), "NOW()".to_string())],
        }
    }

    pub fn validate(&self) -> Result<(), UpsertError> {
        let names = [&self.table, &self.constraint]
            .into_iter()
            .chain(self.extra_set.iter().map(|(column, _)| column));
        for name in names {
            if !IDENTIFIER_RE.is_match(name) {
                return Err(UpsertError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(())
    }

    pub fn insert_prefix(&self) -> String {
        format!("INSERT INTO {} ({}) ", self.table, COLUMNS.join(", "))
    }

    pub fn conflict_clause(&self) -> String {
        let expr_for = |column: &str| {
            self.extra_set
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, expr)| expr.clone())
        };

        let mut assignments: Vec<String> = COLUMNS
            .iter()
            .map(|column| match expr_for(column) {
                Some(expr) => format!("{} = {}", column, expr),
                None => format!("{} = EXCLUDED.{}", column, column),
            })
            .collect();
        assignments.extend(
            self.extra_set
                .iter()
                .filter(|(name, _)| !COLUMNS.contains(&name.as_str()))
                .map(|(name, expr)| format!("{} = {}", name, expr)),
        );

        format!(
            " ON CONFLICT ON CONSTRAINT {} DO UPDATE SET {}",
            self.constraint,
            assignments.join(", ")
        )
    }
}

impl Default for UpsertTarget {
    fn default() -> Self {
        Self::new("district_perf", "district_pref_uniq")
    }
}

/// Checks the four fields that make up the uniqueness key.
pub fn check_key(record: &PerformanceRecord) -> Result<(), UpsertError> {
    let missing = |field| UpsertError::MissingKey {
        club: record.club.clone(),
        field,
    };
    if record.district.is_empty() {
        return Err(missing("district"));
    }
    if record.club.is_empty() {
        return Err(missing("club"));
    }
    if record.report_year.is_none() {
        return Err(missing("report_year"));
    }
    if record.report_month.is_none() {
        return Err(missing("report_month"));
    }
    Ok(())
}

/// Checks every key and rejects a batch that would touch the same row twice,
/// which Postgres refuses inside one `ON CONFLICT DO UPDATE` statement.
pub fn check_batch(records: &[PerformanceRecord]) -> Result<(), UpsertError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        check_key(record)?;
        let year = record.report_year.unwrap_or_default();
        let month = record.report_month.unwrap_or_default();
        if !seen.insert((record.district.as_str(), record.club.as_str(), year, month)) {
            return Err(UpsertError::DuplicateKey {
                district: record.district.clone(),
                club: record.club.clone(),
                year,
                month,
            });
        }
    }
    Ok(())
}

/// Destination for cleaned, period-stamped records.
#[async_trait]
pub trait RecordSink {
    /// Inserts the batch, updating rows that hit the target's constraint.
    /// The whole batch commits or nothing does. Returns affected rows.
    async fn upsert(
        &self,
        records: &[PerformanceRecord],
        target: &UpsertTarget,
    ) -> Result<u64, UpsertError>;
}

pub struct PgUpserter {
    pool: PgPool,
}

impl PgUpserter {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, UpsertError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSink for PgUpserter {
    async fn upsert(
        &self,
        records: &[PerformanceRecord],
        target: &UpsertTarget,
    ) -> Result<u64, UpsertError> {
        target.validate()?;
        if records.is_empty() {
            debug!("Nothing to upsert into {}", target.table);
            return Ok(0);
        }
        check_batch(records)?;

        let prefix = target.insert_prefix();
        let conflict = target.conflict_clause();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());
            qb.push_values(chunk, |mut row, record| {
                row.push_bind(record.district.clone())
                    .push_bind(record.division.clone())
                    .push_bind(record.area.clone())
                    .push_bind(record.club.clone())
                    .push_bind(record.club_name.clone())
                    .push_bind(record.new_members)
                    .push_bind(record.late_renewals)
                    .push_bind(record.oct_renewals)
                    .push_bind(record.apr_renewals)
                    .push_bind(record.total_renewals)
                    .push_bind(record.total_chart)
                    .push_bind(record.total_to_date)
                    .push_bind(record.distinguished_status.clone())
                    .push_bind(record.charter_suspend_date.clone())
                    .push_bind(record.charter_date)
                    .push_bind(record.suspend_date)
                    .push_bind(record.report_year)
                    .push_bind(record.report_month)
                    .push_bind(Json(record.extra_columns.clone()));
            });
            qb.push(conflict.as_str());

            let result = qb.build().execute(&mut *tx).await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;
        info!("Upserted {} rows into {}", affected, target.table);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_prefix_lists_all_columns() {
        let target = UpsertTarget::default();
        let prefix = target.insert_prefix();
        assert!(prefix.starts_with("INSERT INTO district_perf (district, division, area, club,"));
        assert!(prefix.contains("report_year, report_month, extra_columns)"));
    }

    #[test]
    fn test_conflict_clause() {
        let target = UpsertTarget::default();
        let clause = target.conflict_clause();
        assert!(clause.starts_with(" ON CONFLICT ON CONSTRAINT district_pref_uniq DO UPDATE SET "));
        for column in COLUMNS {
            assert!(clause.contains(&format!("{} = EXCLUDED.{}", column, column)), "{}", column);
        }
        assert!(clause.ends_with(", updated_at = NOW()"));
    }

    #[test]
    fn test_extra_set_overrides_column() {
        let mut target = UpsertTarget::default();
        target.extra_set.push(("club_name".to_string(), "district_perf.club_name".to_string()));
        let clause = target.conflict_clause();
        assert!(clause.contains("club_name = district_perf.club_name"));
        assert!(!clause.contains("club_name = EXCLUDED.club_name"));
    }

    #[test]
    fn test_validate_identifiers() {
        assert!(UpsertTarget::default().validate().is_ok());
        assert!(UpsertTarget::new("public.district_perf", "uniq").validate().is_ok());
        assert!(matches!(
            UpsertTarget::new("district_perf; DROP TABLE x", "uniq").validate(),
            Err(UpsertError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_check_key() {
        let mut record = PerformanceRecord {
            district: "88".to_string(),
            club: "07919786".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            check_key(&record),
            Err(UpsertError::MissingKey { field: "report_year", .. })
        ));
        record.report_year = Some(2023);
        record.report_month = Some(6);
        assert!(check_key(&record).is_ok());
        record.club.clear();
        assert!(check_key(&record).is_err());
    }

    #[test]
    fn test_check_batch_rejects_repeated_key() {
        let record = |club: &str, month| PerformanceRecord {
            district: "88".to_string(),
            club: club.to_string(),
            report_year: Some(2023),
            report_month: Some(month),
            ..Default::default()
        };

        let batch = vec![record("07919786", 6), record("00001234", 6), record("07919786", 7)];
        assert!(check_batch(&batch).is_ok());

        let batch = vec![record("07919786", 6), record("00001234", 6), record("07919786", 6)];
        match check_batch(&batch) {
            Err(UpsertError::DuplicateKey { district, club, year, month }) => {
                assert_eq!((district.as_str(), club.as_str(), year, month), ("88", "07919786", 2023, 6));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_batch_fails_before_connecting() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let upserter = PgUpserter::from_pool(pool);
        let record = PerformanceRecord {
            district: "88".to_string(),
            club: "07919786".to_string(),
            report_year: Some(2023),
            report_month: Some(6),
            ..Default::default()
        };
        let result = upserter
            .upsert(&[record.clone(), record], &UpsertTarget::default())
            .await;
        assert!(matches!(result, Err(UpsertError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let upserter = PgUpserter::from_pool(pool);
        let affected = upserter.upsert(&[], &UpsertTarget::default()).await.unwrap();
        assert_eq!(affected, 0);
    }
}

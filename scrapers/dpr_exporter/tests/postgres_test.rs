use sqlx::{postgres::PgPoolOptions, Executor};
use std::env;

use dpr_exporter::{
    clean_report::{clean, stamp},
    types::ReportPeriod,
    upsert::{PgUpserter, RecordSink, UpsertTarget},
};

const REPORT: &str = include_str!("fixtures/report/district_88_2023_06.csv");
const SCHEMA: &str = include_str!("../sql/district_perf.sql");

// Needs a scratch database: DATABASE_URL=... cargo test -- --ignored
#[tokio::test]
#[ignore]
async fn test_upsert_twice_keeps_one_row_per_key() {
    dotenv::dotenv().ok();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    pool.execute("DROP TABLE IF EXISTS dpr_test_perf").await.unwrap();
    let schema = SCHEMA
        .replace("district_perf", "dpr_test_perf")
        .replace("district_pref_uniq", "dpr_test_perf_uniq");
    pool.execute(schema.as_str())
        .await
        .unwrap();

    let period = ReportPeriod::new(2023, 6).unwrap();
    let records = stamp(clean(REPORT).unwrap(), period);
    let target = UpsertTarget::new("dpr_test_perf", "dpr_test_perf_uniq");
    let upserter = PgUpserter::from_pool(pool.clone());

    assert_eq!(upserter.upsert(&records, &target).await.unwrap(), 4);
    assert_eq!(upserter.upsert(&records, &target).await.unwrap(), 4);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dpr_test_perf")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 4);

    let (updated,): (bool,) =
        sqlx::query_as("SELECT bool_and(updated_at >= created_at) FROM dpr_test_perf")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(updated);

    pool.execute("DROP TABLE dpr_test_perf").await.unwrap();
}

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use crate::{
    clean_report::{clean, stamp},
    club_detail::ClubDetailExtractor,
    config::FetchTarget,
    requester::Requester,
    types::{ClubDetail, ReportPeriod},
    upsert::{RecordSink, UpsertTarget},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub periods_ok: usize,
    pub periods_failed: usize,
    pub rows_affected: u64,
}

/// Drives fetch -> clean -> stamp -> upsert for every configured period, one at a time.
pub struct Runner<S> {
    requester: Requester,
    sink: S,
    target: UpsertTarget,
    keep_going: bool,
}

impl<S: RecordSink + Sync> Runner<S> {
    pub fn new(requester: Requester, sink: S, target: UpsertTarget) -> Self {
        Self {
            requester,
            sink,
            target,
            keep_going: false,
        }
    }

    /// Log failed periods and carry on instead of stopping at the first one.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn process_period(&self, district: u32, period: ReportPeriod) -> Result<u64> {
        let text = self
            .requester
            .fetch_report(district, period)
            .await
            .with_context(|| format!("Failed to fetch report for district {} ({})", district, period))?;

        let records = clean(&text)
            .with_context(|| format!("Failed to clean report for district {} ({})", district, period))?;
        let records = stamp(records, period);

        let affected = self
            .sink
            .upsert(&records, &self.target)
            .await
            .with_context(|| format!("Failed to save report for district {} ({})", district, period))?;

        info!(
            "District {} ({}): {} records, {} rows upserted",
            district,
            period,
            records.len(),
            affected
        );
        Ok(affected)
    }

    pub async fn run(&self, targets: &[FetchTarget]) -> Result<RunSummary> {
        let total: usize = targets.iter().map(|t| t.periods.len()).sum();
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} periods ({eta})")
                .context("Invalid progress bar template")?,
        );

        let mut summary = RunSummary::default();
        for target in targets {
            for &period in &target.periods {
                match self.process_period(target.district, period).await {
                    Ok(affected) => {
                        summary.periods_ok += 1;
                        summary.rows_affected += affected;
                    }
                    Err(e) if self.keep_going => {
                        error!("{:#}", e);
                        summary.periods_failed += 1;
                    }
                    Err(e) => {
                        pb.abandon();
                        return Err(e);
                    }
                }
                pb.inc(1);
            }
        }

        pb.finish_with_message("Export complete");
        info!(
            "Processed {} periods ({} failed), {} rows upserted",
            summary.periods_ok + summary.periods_failed,
            summary.periods_failed,
            summary.rows_affected
        );
        Ok(summary)
    }
}

/// Fetches and extracts a single club's profile page.
pub async fn club_detail(requester: &Requester, club_id: &str) -> Result<ClubDetail> {
    let html = requester
        .fetch_club_detail(club_id)
        .await
        .with_context(|| format!("Failed to fetch club {}", club_id))?;
    ClubDetailExtractor::new()
        .extract(&html)
        .with_context(|| format!("Failed to extract details for club {}", club_id))
}

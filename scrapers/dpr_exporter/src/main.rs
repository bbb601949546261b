use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::{fs, path::PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dpr_exporter::{
    clean_report::{clean, stamp},
    config::AppConfig,
    requester::{decode_text, Requester},
    runner::{club_detail, Runner},
    types::ReportPeriod,
    upsert::{PgUpserter, UpsertTarget},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "District performance report exporter", long_about = None)]
struct Cli {
    /// Config file
    #[arg(
        short,
        long,
        env = "DPR_EXPORTER_CONFIG_FILE",
        default_value = "config.yaml",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, clean and upsert every configured district and period
    Run {
        /// Log failed periods and continue with the rest
        #[arg(long)]
        keep_going: bool,
    },
    /// Fetch a club's profile page and print the extracted details as JSON
    ClubDetail {
        /// Club number, optionally prefixed with "CB-"
        club_id: String,
    },
    /// Clean a saved report CSV and print the records as JSON
    Clean {
        /// Path to the CSV export
        file: PathBuf,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { keep_going } => {
            let config = AppConfig::load(&cli.config)
                .with_context(|| format!("Failed to load config {:?}", cli.config))?;
            let database_url = config
                .database_url
                .as_deref()
                .context("database_url is not set in the config or DATABASE_URL")?;

            info!(
                "Exporting {} periods across {} districts",
                config.period_count(),
                config.fetch.len()
            );

            let requester = Requester::new(&config.scraping)?;
            let sink = PgUpserter::connect(database_url, config.upsert.max_connections).await?;
            let target = UpsertTarget::new(&config.upsert.table, &config.upsert.constraint);

            let summary = Runner::new(requester, sink, target)
                .keep_going(keep_going)
                .run(&config.fetch)
                .await?;

            if summary.periods_failed > 0 {
                anyhow::bail!(
                    "{} of {} periods failed",
                    summary.periods_failed,
                    summary.periods_ok + summary.periods_failed
                );
            }
        }
        Commands::ClubDetail { club_id } => {
            let config = AppConfig::load_or_default(&cli.config)?;
            let requester = Requester::new(&config.scraping)?;
            let detail = club_detail(&requester, &club_id).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Commands::Clean { file, year, month } => {
            let config = AppConfig::load_or_default(&cli.config)?;
            let period = ReportPeriod::new(year, month)?;
            let bytes = fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let text = decode_text(&bytes, None, &config.scraping.default_encoding)?;
            let records = stamp(clean(&text)?, period);
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["dpr_exporter", "run"]);
        assert!(matches!(cli.command, Commands::Run { keep_going: false }));
        if std::env::var("DPR_EXPORTER_CONFIG_FILE").is_err() {
            assert_eq!(cli.config, PathBuf::from("config.yaml"));
        }
    }

    #[test]
    fn test_config_flag_after_subcommand() {
        let cli = Cli::parse_from(["dpr_exporter", "run", "--keep-going", "-c", "/etc/dpr.yaml"]);
        assert!(matches!(cli.command, Commands::Run { keep_going: true }));
        assert_eq!(cli.config, PathBuf::from("/etc/dpr.yaml"));
    }

    #[test]
    fn test_club_detail_and_clean() {
        let cli = Cli::parse_from(["dpr_exporter", "club-detail", "CB-07919786"]);
        assert!(matches!(cli.command, Commands::ClubDetail { ref club_id } if club_id == "CB-07919786"));

        let cli = Cli::parse_from([
            "dpr_exporter", "--config", "dpr.yaml", "clean", "report.csv", "--year", "2023", "--month", "6",
        ]);
        assert_eq!(cli.config, PathBuf::from("dpr.yaml"));
        assert!(matches!(cli.command, Commands::Clean { year: 2023, month: 6, .. }));
    }
}

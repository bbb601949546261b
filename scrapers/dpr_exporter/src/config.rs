use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::warn;

use crate::fiscal::DEFAULT_REPORT_BASE_URL;
use crate::requester::DEFAULT_CLUB_BASE_URL;
use crate::types::ReportPeriod;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScrapingConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Encoding used when a response does not declare a charset.
    pub default_encoding: String,
    pub report_base_url: String,
    pub club_base_url: String,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/116.0"
                .to_string(),
            request_timeout_secs: 30,
            default_encoding: "utf-8".to_string(),
            report_base_url: DEFAULT_REPORT_BASE_URL.to_string(),
            club_base_url: DEFAULT_CLUB_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpsertConfig {
    pub table: String,
    pub constraint: String,
    pub max_connections: u32,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            table: "district_perf".to_string(),
            constraint: "district_pref_uniq".to_string(),
            max_connections: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchTarget {
    pub district: u32,
    pub periods: Vec<ReportPeriod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub fetch: Vec<FetchTarget>,
    #[serde(default)]
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub upsert: UpsertConfig,
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads the YAML file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(user_agent) = env::var("SCRAPER_USER_AGENT") {
            self.scraping.user_agent = user_agent;
        }
        if let Ok(timeout) = env::var("SCRAPER_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.scraping.request_timeout_secs = secs,
                Err(_) => warn!("Ignoring invalid SCRAPER_TIMEOUT_SECS value '{}'", timeout),
            }
        }
    }

    pub fn period_count(&self) -> usize {
        self.fetch.iter().map(|target| target.periods.len()).sum()
    }
}

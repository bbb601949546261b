use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ScrapingConfig;
use crate::fiscal::{PeriodError, ReportUrlBuilder};
use crate::types::ReportPeriod;

pub const DEFAULT_CLUB_BASE_URL: &str = "https://www.toastmasters.org/Find-a-Club";

// Only the head of a page is searched for a <meta> charset.
const META_SNIFF_LEN: usize = 1024;

static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]*?charset\s*=\s*["']?\s*(?P<charset>[A-Za-z0-9_:.-]+)"#)
        .expect("valid meta charset regex")
});

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: StatusCode },
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported charset '{0}'")]
    UnsupportedCharset(String),
    #[error("Response body is not valid {0}")]
    Malformed(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum PageRequestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReportRequestError {
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Raw body plus the declared content type of a successful response.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Pulls the `charset` parameter out of a `Content-Type` header value.
pub fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_ascii_lowercase())
        }
    })
}

/// Decodes a body with its declared charset, or `default_encoding` when none is declared.
pub fn decode_text(
    bytes: &[u8],
    content_type: Option<&str>,
    default_encoding: &str,
) -> Result<String, DecodeError> {
    let label = content_type
        .and_then(extract_charset)
        .unwrap_or_else(|| default_encoding.to_string());
    let declared = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| DecodeError::UnsupportedCharset(label.clone()))?;

    // A byte-order mark wins over the header.
    let (encoding, bom_len) = Encoding::for_bom(bytes).unwrap_or((declared, 0));
    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .map(|text| text.into_owned())
        .ok_or(DecodeError::Malformed(encoding.name()))
}

/// Finds a charset declared by a `<meta>` tag at the top of an HTML page.
pub fn sniff_html_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(META_SNIFF_LEN)];
    let caps = META_CHARSET_RE.captures(head)?;
    let charset = std::str::from_utf8(&caps["charset"]).ok()?;
    Some(charset.to_ascii_lowercase())
}

/// Decodes an HTML page: BOM, then `Content-Type` charset, then `<meta>` charset,
/// then `default_encoding`.
pub fn decode_html(
    bytes: &[u8],
    content_type: Option<&str>,
    default_encoding: &str,
) -> Result<String, DecodeError> {
    let fallback = sniff_html_charset(bytes).unwrap_or_else(|| default_encoding.to_string());
    decode_text(bytes, content_type, &fallback)
}

/// Uppercases a club identifier and drops an optional `CB-` prefix.
pub fn normalize_club_id(club_id: &str) -> String {
    let club_id = club_id.trim().to_uppercase();
    match club_id.strip_prefix("CB-") {
        Some(stripped) => stripped.to_string(),
        None => club_id,
    }
}

pub struct Requester {
    client: reqwest::Client,
    urls: ReportUrlBuilder,
    club_base_url: String,
    default_encoding: String,
}

impl Requester {
    pub fn new(config: &ScrapingConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            urls: ReportUrlBuilder::new(&config.report_base_url),
            club_base_url: config.club_base_url.trim_end_matches('/').to_string(),
            default_encoding: config.default_encoding.clone(),
        })
    }

    /// GET `url`; any non-2xx status is an error.
    pub async fn fetch(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(transport)?.to_vec();
        debug!("Fetched {} bytes from {} ({:?})", bytes.len(), url, content_type);

        Ok(FetchedBody {
            bytes,
            content_type,
        })
    }

    /// Downloads and decodes the district performance CSV for one period.
    pub async fn fetch_report(
        &self,
        district: u32,
        period: ReportPeriod,
    ) -> Result<String, ReportRequestError> {
        let url = self.urls.build(district, period)?;
        let body = self.fetch(&url).await?;
        let text = decode_text(
            &body.bytes,
            body.content_type.as_deref(),
            &self.default_encoding,
        )?;
        Ok(text)
    }

    pub fn club_detail_url(&self, club_id: &str) -> String {
        format!(
            "{}/{}",
            self.club_base_url,
            urlencoding::encode(&normalize_club_id(club_id))
        )
    }

    /// Downloads and decodes a club's public profile page.
    pub async fn fetch_club_detail(&self, club_id: &str) -> Result<String, PageRequestError> {
        let url = self.club_detail_url(club_id);
        info!("Fetching club detail page {}", url);
        let body = self.fetch(&url).await?;
        let html = decode_html(
            &body.bytes,
            body.content_type.as_deref(),
            &self.default_encoding,
        )?;
        Ok(html)
    }
}

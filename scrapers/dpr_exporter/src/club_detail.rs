use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::coords::wgs84_to_gcj02;
use crate::types::{ClubDetail, MeetingTime};

pub const WEEK_DAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const NBSP: char = '\u{a0}';

static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1.title").expect("valid title selector"));
static CONTACT_BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.contact-info-body").expect("valid contact selector"));
static MEETING_TIMES_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.contact-info-meeting-times").expect("valid meeting times selector")
});

static CLUB_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Club Number:\s*\d{8},\s*(?P<district>\d{1,3}),\s*Area\s+(?P<division>[A-Z])(?P<area>\d{2})?",
    )
    .expect("valid club number regex")
});
static MAP_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"maps\?rtp=~pos\.(?P<lat>\d{1,2}(?:\.\d+)?)_(?P<lon>\d{1,3}(?:\.\d+)?)")
        .expect("valid map link regex")
});
// Whitespace runs, except the non-breaking space that separates address parts.
static SPACE_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\x{A0}]+").expect("valid space regex"));

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("No element matching '{0}'")]
    Missing(&'static str),
    #[error("No 'Club Number' line found in page")]
    ClubNumber,
    #[error("Invalid meeting time '{text}': {reason}")]
    MeetingTime { text: String, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubNumber {
    pub district: String,
    pub division: String,
    pub area: String,
}

fn direct_text_nodes<'a>(element: ElementRef<'a>) -> impl Iterator<Item = &'a str> + 'a {
    element
        .children()
        .filter_map(|node| node.value().as_text())
        .map(|text| &**text)
}

/// Finds district, division and area in the page text.
pub fn parse_club_number(text: &str) -> Result<ClubNumber, ExtractionError> {
    let caps = CLUB_NUMBER_RE
        .captures(text)
        .ok_or(ExtractionError::ClubNumber)?;

    let area = caps
        .name("area")
        .map(|m| m.as_str().trim_start_matches('0').to_string())
        .unwrap_or_default();

    Ok(ClubNumber {
        district: caps["district"].to_string(),
        division: caps["division"].to_string(),
        area,
    })
}

/// Finds the `(lat, lon)` of an embedded map route link.
pub fn parse_map_location(raw_html: &str) -> Option<(f64, f64)> {
    let caps = MAP_LINK_RE.captures(raw_html)?;
    let lat = caps["lat"].parse::<f64>().ok()?;
    let lon = caps["lon"].parse::<f64>().ok()?;
    Some((lat, lon))
}

/// Parses text like `Mondays 7:00 PM - 8:00 PM` (space may be U+00A0).
pub fn parse_meeting_time(text: &str) -> Result<MeetingTime, ExtractionError> {
    let invalid = |reason| ExtractionError::MeetingTime {
        text: text.to_string(),
        reason,
    };

    let (days, span) = text
        .split_once(char::is_whitespace)
        .ok_or_else(|| invalid("expected '<weekday> <begin>-<end>'"))?;

    let day = days.strip_suffix('s').unwrap_or(days);
    let day = WEEK_DAYS
        .iter()
        .position(|d| *d == day)
        .ok_or_else(|| invalid("unknown weekday"))?;

    let parts: Vec<&str> = span.split('-').map(str::trim).collect();
    if parts.len() != 2 {
        return Err(invalid("expected a '<begin>-<end>' time span"));
    }

    Ok(MeetingTime {
        day: day as u8,
        time_begin: parts[0].to_string(),
        time_end: parts[1].to_string(),
    })
}

pub struct ClubDetailExtractor;

impl ClubDetailExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extracts the club details from an already decoded page.
    pub fn extract(&self, html: &str) -> Result<ClubDetail, ExtractionError> {
        let document = Html::parse_document(html);

        let name = self.extract_club_name(&document)?;
        let address = self.extract_address(&document)?;
        let number = self.extract_club_number(&document)?;
        let meeting_time = self.extract_meeting_time(&document)?;
        let location_wgs84 = parse_map_location(html);
        let location_local = location_wgs84.map(|(lat, lon)| wgs84_to_gcj02(lat, lon));

        debug!("Extracted club '{}' (district {})", name, number.district);

        Ok(ClubDetail {
            name,
            address,
            district: number.district,
            division: number.division,
            area: number.area,
            meeting_time,
            location_wgs84,
            location_local,
        })
    }

    pub fn extract_club_name(&self, document: &Html) -> Result<String, ExtractionError> {
        document
            .select(&TITLE_SELECTOR)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .ok_or(ExtractionError::Missing("h1.title"))
    }

    pub fn extract_address(&self, document: &Html) -> Result<Vec<String>, ExtractionError> {
        let body = document
            .select(&CONTACT_BODY_SELECTOR)
            .next()
            .ok_or(ExtractionError::Missing("div.contact-info-body"))?;

        Ok(direct_text_nodes(body)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| SPACE_RUN_RE.replace_all(line, " ").replace(NBSP, ","))
            .collect())
    }

    pub fn extract_club_number(&self, document: &Html) -> Result<ClubNumber, ExtractionError> {
        let text = document
            .root_element()
            .text()
            .collect::<String>()
            .replace(NBSP, " ");
        parse_club_number(&text)
    }

    pub fn extract_meeting_time(
        &self,
        document: &Html,
    ) -> Result<Option<MeetingTime>, ExtractionError> {
        let Some(container) = document.select(&MEETING_TIMES_SELECTOR).next() else {
            return Ok(None);
        };

        direct_text_nodes(container)
            .map(str::trim)
            .find(|text| !text.is_empty())
            .map(parse_meeting_time)
            .transpose()
    }
}

impl Default for ClubDetailExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_club_number() {
        let number = parse_club_number("Club Number:\n12345678, 88, Area D04").unwrap();
        assert_eq!(
            number,
            ClubNumber {
                district: "88".to_string(),
                division: "D".to_string(),
                area: "4".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_club_number_without_area_digits() {
        let number = parse_club_number("Club Number: 07919786, 1, Area F").unwrap();
        assert_eq!(number.district, "1");
        assert_eq!(number.division, "F");
        assert_eq!(number.area, "");
    }

    #[test]
    fn test_parse_club_number_missing() {
        assert!(matches!(
            parse_club_number("Club Number: 1234, 88, Area D04"),
            Err(ExtractionError::ClubNumber)
        ));
        assert!(parse_club_number("no club here").is_err());
    }

    #[test]
    fn test_parse_map_location() {
        let html = r#"<a href="https://www.bing.com/maps?rtp=~pos.39.7631_116.21457">Directions</a>"#;
        assert_eq!(parse_map_location(html), Some((39.7631, 116.21457)));
        assert_eq!(parse_map_location("https://www.bing.com/maps?q=beijing"), None);
        assert_eq!(parse_map_location("maps?rtp=~pos.123.4_116.2"), None);
    }

    #[test]
    fn test_parse_meeting_time() {
        let meeting = parse_meeting_time("Mondays\u{a0}7:00 PM - 8:00 PM").unwrap();
        assert_eq!(
            meeting,
            MeetingTime {
                day: 0,
                time_begin: "7:00 PM".to_string(),
                time_end: "8:00 PM".to_string(),
            }
        );

        let meeting = parse_meeting_time("Sundays 2:30 PM-4:30 PM").unwrap();
        assert_eq!(meeting.day, 6);
        assert_eq!(meeting.time_begin, "2:30 PM");
        assert_eq!(meeting.time_end, "4:30 PM");
    }

    #[test]
    fn test_parse_meeting_time_errors() {
        assert!(matches!(
            parse_meeting_time("Someday\u{a0}7:00 PM - 8:00 PM"),
            Err(ExtractionError::MeetingTime { reason: "unknown weekday", .. })
        ));
        assert!(parse_meeting_time("Mondays").is_err());
        assert!(parse_meeting_time("Mondays 7:00 PM").is_err());
    }

    #[test]
    fn test_address_lines() {
        let html = "<html><body><div class=\"contact-info-body\"><strong>Address</strong>\n   \
                    12 Main   Street\u{a0}Haidian  <br/>\n  Beijing,   100000 <br/>  \n</div></body></html>";
        let document = Html::parse_document(html);
        let address = ClubDetailExtractor::new().extract_address(&document).unwrap();
        assert_eq!(address, vec!["12 Main Street,Haidian", "Beijing, 100000"]);
    }

    #[test]
    fn test_meeting_time_absent() {
        let extractor = ClubDetailExtractor::new();
        let document = Html::parse_document(
            "<div class=\"contact-info-meeting-times\"><strong>Meets</strong>  </div>",
        );
        assert_eq!(extractor.extract_meeting_time(&document).unwrap(), None);

        let document = Html::parse_document("<p>nothing</p>");
        assert_eq!(extractor.extract_meeting_time(&document).unwrap(), None);
    }

    #[test]
    fn test_missing_title() {
        let document = Html::parse_document("<h1>Not a title</h1>");
        assert!(matches!(
            ClubDetailExtractor::new().extract_club_name(&document),
            Err(ExtractionError::Missing("h1.title"))
        ));
    }
}

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ScrapeError;

static DOCKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{2}-[A-Z]-\d{4}$").unwrap());
static DOCKET_SCAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2}-[A-Z]-\d{4}").unwrap());

pub const CASE_URL_BASE: &str =
    "https://documents.dps.ny.gov/public/MatterManagement/CaseMaster.aspx";

/// Query parameter on the case-master page that carries the docket id.
pub const CASE_QUERY_KEY: &str = "MatterCaseNo";

/// Validated docket identifier, e.g. `22-M-0645`. The one parser behind the
/// bootstrap scan, the seed-list load, `--cases`, and page-URL extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocketId(String);

impl DocketId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-master URL addressing this docket.
    pub fn case_url(&self) -> String {
        format!("{CASE_URL_BASE}?{CASE_QUERY_KEY}={}", self.0)
    }
}

impl FromStr for DocketId {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if DOCKET_RE.is_match(s) {
            Ok(DocketId(s.to_string()))
        } else {
            Err(ScrapeError::InvalidDocketId(s.to_string()))
        }
    }
}

impl fmt::Display for DocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull the docket id out of a case page URL's query string.
///
/// An absent key and a malformed value are both reported as errors so the
/// caller can tell the page apart from a case page, but neither is treated
/// as a crawl failure.
pub fn docket_from_url(url: &str) -> Result<DocketId, ScrapeError> {
    let parsed = Url::parse(url).map_err(|_| ScrapeError::CaseIdMissing(url.to_string()))?;
    let value = parsed
        .query_pairs()
        .find(|(key, _)| key == CASE_QUERY_KEY)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| ScrapeError::CaseIdMissing(url.to_string()))?;
    value.parse()
}

/// Scan arbitrary text (an HTML dump of the case-list table) for docket-shaped
/// strings. First occurrence wins; order preserved.
pub fn scan_docket_ids(text: &str) -> Vec<DocketId> {
    let mut seen = std::collections::HashSet::new();
    DOCKET_SCAN_RE
        .find_iter(text)
        .filter(|m| seen.insert(m.as_str().to_string()))
        .map(|m| DocketId(m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_docket() {
        let id: DocketId = "22-M-0645".parse().unwrap();
        assert_eq!(id.as_str(), "22-M-0645");
    }

    #[test]
    fn rejects_malformed_dockets() {
        for bad in ["22-m-0645", "222-M-0645", "22-M-645", "22M0645", "", "22-M-06451"] {
            assert!(bad.parse::<DocketId>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn case_url_round_trips() {
        let id: DocketId = "18-E-0138".parse().unwrap();
        let url = id.case_url();
        assert_eq!(docket_from_url(&url).unwrap(), id);
    }

    #[test]
    fn url_without_case_key_is_missing() {
        let err = docket_from_url("https://documents.dps.ny.gov/public/Home.aspx").unwrap_err();
        assert_eq!(err.kind(), "case-id-missing");
    }

    #[test]
    fn url_with_malformed_case_is_invalid() {
        let err =
            docket_from_url(&format!("{CASE_URL_BASE}?{CASE_QUERY_KEY}=garbage")).unwrap_err();
        assert_eq!(err.kind(), "invalid-docket-id");
    }

    #[test]
    fn scan_dedups_preserving_order() {
        let html = r#"<tr><td><a>24-E-0165</a></td></tr>
                      <tr><td><a>22-M-0645</a></td></tr>
                      <tr><td><a>24-E-0165</a></td></tr>"#;
        let ids = scan_docket_ids(html);
        assert_eq!(
            ids.iter().map(DocketId::as_str).collect::<Vec<_>>(),
            vec!["24-E-0165", "22-M-0645"]
        );
    }
}

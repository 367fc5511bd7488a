use thiserror::Error;

/// Everything that can go wrong for a single case. Page processing catches
/// these at the page boundary and records them; only error-log I/O and driver
/// session failures are allowed to kill the run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("row extraction failed: {0}")]
    RowExtraction(String),

    #[error("no case number in page url: {0}")]
    CaseIdMissing(String),

    #[error("invalid docket id: {0:?}")]
    InvalidDocketId(String),

    #[error("filings table extraction failed: {0}")]
    TableExtraction(String),

    #[error("failed to persist filing set: {0}")]
    PersistIo(String),

    #[error("docket verification rejected for {docket}: status {status}, response: {body}")]
    VerifyRejected {
        docket: String,
        status: u16,
        body: String,
    },

    #[error("filing submission rejected for {docket}: status {status}, response: {body}")]
    SubmitRejected {
        docket: String,
        status: u16,
        body: String,
    },

    #[error("page load indicator never cleared on {0}")]
    LoadTimeout(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ScrapeError {
    /// Stable kind string, persisted as `error_type` in the detail log.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::RowExtraction(_) => "row-extraction",
            ScrapeError::CaseIdMissing(_) => "case-id-missing",
            ScrapeError::InvalidDocketId(_) => "invalid-docket-id",
            ScrapeError::TableExtraction(_) => "table-extraction",
            ScrapeError::PersistIo(_) => "persist-io",
            ScrapeError::VerifyRejected { .. } => "verify-rejected",
            ScrapeError::SubmitRejected { .. } => "submit-rejected",
            ScrapeError::LoadTimeout(_) => "load-timeout",
            ScrapeError::Http(_) => "http",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        let e = ScrapeError::VerifyRejected {
            docket: "22-M-0645".into(),
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(e.kind(), "verify-rejected");
        assert_eq!(ScrapeError::InvalidDocketId("nope".into()).kind(), "invalid-docket-id");
        assert_eq!(ScrapeError::LoadTimeout("http://x".into()).kind(), "load-timeout");
    }

    #[test]
    fn rejection_message_carries_status_and_body() {
        let e = ScrapeError::SubmitRejected {
            docket: "22-M-0645".into(),
            status: 400,
            body: "bad payload".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("400"));
        assert!(msg.contains("bad payload"));
        assert!(msg.contains("22-M-0645"));
    }
}

//! Downstream verification + ingestion API client.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::warn;

use crate::docket::DocketId;
use crate::error::ScrapeError;
use crate::extract::FilingRecord;

pub const DEFAULT_VERIFY_URL: &str = "https://api.kessler.xyz/v2/public/conversations/verify";
pub const DEFAULT_INGEST_URL: &str =
    "https://thaum.kessler.xyz/v1/process-scraped-doc/ny-puc/list?priority=false";

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// What the crawl needs from the downstream service. A trait so graph tests
/// can stub it without sockets.
#[allow(async_fn_in_trait)]
pub trait Downstream {
    /// Confirm the docket exists downstream. Anything but 200 rejects the case.
    async fn verify_docket(&self, docket: &DocketId) -> Result<(), ScrapeError>;

    /// Hand the full filings list to the ingestion endpoint. Anything but 201
    /// rejects the case.
    async fn submit_filings(
        &self,
        docket: &DocketId,
        filings: &[FilingRecord],
    ) -> Result<(), ScrapeError>;
}

pub struct DownstreamClient {
    http: reqwest::Client,
    verify_url: String,
    ingest_url: String,
    base_backoff: Duration,
}

impl DownstreamClient {
    pub fn new(verify_url: impl Into<String>, ingest_url: impl Into<String>) -> DownstreamClient {
        DownstreamClient {
            http: reqwest::Client::new(),
            verify_url: verify_url.into(),
            ingest_url: ingest_url.into(),
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }

    /// Production endpoints, overridable via `NYPUC_VERIFY_URL` and
    /// `NYPUC_INGEST_URL`.
    pub fn from_env() -> DownstreamClient {
        let verify =
            std::env::var("NYPUC_VERIFY_URL").unwrap_or_else(|_| DEFAULT_VERIFY_URL.into());
        let ingest =
            std::env::var("NYPUC_INGEST_URL").unwrap_or_else(|_| DEFAULT_INGEST_URL.into());
        DownstreamClient::new(verify, ingest)
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: Duration) -> DownstreamClient {
        self.base_backoff = backoff;
        self
    }

    /// POST with bounded retries on transport failures, 5xx responses, and
    /// 429 rate limiting. Other 4xx responses come back as-is; rejection is
    /// final.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, ScrapeError> {
        let mut attempt = 0;
        loop {
            let result = self.http.post(url).json(body).send().await;
            let retryable = match &result {
                Ok(resp) => {
                    resp.status().is_server_error()
                        || resp.status() == StatusCode::TOO_MANY_REQUESTS
                }
                Err(e) => e.is_connect() || e.is_timeout(),
            };
            if !retryable || attempt >= MAX_RETRIES {
                return Ok(result?);
            }

            let backoff = self.base_backoff * 2u32.pow(attempt);
            warn!(
                "transient failure posting to {} (attempt {}/{}), backing off {:.1}s",
                url,
                attempt + 1,
                MAX_RETRIES,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

impl Downstream for DownstreamClient {
    async fn verify_docket(&self, docket: &DocketId) -> Result<(), ScrapeError> {
        let payload = serde_json::json!({ "docket_id": docket.as_str() });
        let resp = self.post_json(&self.verify_url, &payload).await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ScrapeError::VerifyRejected {
                docket: docket.to_string(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn submit_filings(
        &self,
        docket: &DocketId,
        filings: &[FilingRecord],
    ) -> Result<(), ScrapeError> {
        let resp = self.post_json(&self.ingest_url, filings).await?;
        let status = resp.status();
        if status != StatusCode::CREATED {
            return Err(ScrapeError::SubmitRejected {
                docket: docket.to_string(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_filing() -> FilingRecord {
        FilingRecord {
            serial: "1".into(),
            date_filed: "01/02/2024".into(),
            doc_type: "Correspondence".into(),
            docket_id: "22-M-0645".into(),
            name: "Letter".into(),
            url: "https://documents.dps.ny.gov/public/ViewDoc.aspx?DocId=7".into(),
            organization: "Staff".into(),
            item_no: "3".into(),
            file_name: "letter.pdf".into(),
        }
    }

    fn client_for(server: &MockServer) -> DownstreamClient {
        DownstreamClient::new(
            format!("{}/verify", server.uri()),
            format!("{}/ingest", server.uri()),
        )
        .with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn verify_sends_docket_id_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_json(serde_json::json!({ "docket_id": "22-M-0645" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let docket: DocketId = "22-M-0645".parse().unwrap();
        client_for(&server).verify_docket(&docket).await.unwrap();
    }

    #[tokio::test]
    async fn verify_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such docket"))
            .mount(&server)
            .await;

        let docket: DocketId = "22-M-0645".parse().unwrap();
        let err = client_for(&server).verify_docket(&docket).await.unwrap_err();
        match err {
            ScrapeError::VerifyRejected { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such docket");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let docket: DocketId = "22-M-0645".parse().unwrap();
        client_for(&server).verify_docket(&docket).await.unwrap();
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        client_for(&server)
            .submit_filings(&"22-M-0645".parse().unwrap(), &[sample_filing()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .expect(1)
            .mount(&server)
            .await;

        let docket: DocketId = "22-M-0645".parse().unwrap();
        let err = client_for(&server)
            .submit_filings(&docket, &[sample_filing()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "submit-rejected");
    }

    #[tokio::test]
    async fn submit_posts_filing_array() {
        let server = MockServer::start().await;
        let filing = sample_filing();
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(body_json(serde_json::json!([{
                "serial": "1",
                "date_filed": "01/02/2024",
                "doc_type": "Correspondence",
                "docket_id": "22-M-0645",
                "name": "Letter",
                "url": "https://documents.dps.ny.gov/public/ViewDoc.aspx?DocId=7",
                "organization": "Staff",
                "item_no": "3",
                "file_name": "letter.pdf",
            }])))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .submit_filings(&"22-M-0645".parse().unwrap(), &[filing])
            .await
            .unwrap();
    }
}

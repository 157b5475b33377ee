//! Scorecard retrieval
//!
//! One call, one request: retrying is left to whoever drives the fetches.

use super::util::HEAT_QUERY_KEY;
use crate::board::snapshot::{self, HeatId, Snapshot};

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("scorecard request returned HTTP {0}")]
    Status(u16),
    #[error("scorecard request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unreadable scorecard: {0}")]
    Body(#[from] serde_json::Error),
}

pub trait ScorecardSource {
    fn fetch(&self, heat: &HeatId) -> Result<Snapshot, FetchError>;
}

impl<S: ScorecardSource + ?Sized> ScorecardSource for Box<S> {
    fn fetch(&self, heat: &HeatId) -> Result<Snapshot, FetchError> {
        (**self).fetch(heat)
    }
}

/// Scorecard API over HTTP.
pub struct HttpScorecard {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpScorecard {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<HttpScorecard, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(HttpScorecard {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ScorecardSource for HttpScorecard {
    fn fetch(&self, heat: &HeatId) -> Result<Snapshot, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[(HEAT_QUERY_KEY, heat.as_str())])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text()?;
        Ok(snapshot::parse_snapshot(heat.clone(), &body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            FetchError::Status(503).to_string(),
            "scorecard request returned HTTP 503"
        );
        let body = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(FetchError::from(body)
            .to_string()
            .starts_with("unreadable scorecard"));
    }

    #[test]
    fn builds_client() {
        let s = HttpScorecard::new(super::super::util::DEFAULT_SCORECARD_URL, Duration::from_secs(1))
            .unwrap();
        assert!(s.endpoint().ends_with("GetScorecard"));
    }
}

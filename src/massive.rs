use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::constants::{FETCH_TIMEOUT_SECS, MASSIVE_BASE_URL};
use crate::error::FetchError;
use crate::polled::SnapshotFetcher;

const SNAPSHOT_PATH: &str = "/v2/snapshot/locale/us/markets/stocks/tickers";

#[derive(Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    tickers: Vec<Value>,
}

/// Snapshot fetcher for the Massive (Polygon-compatible) REST API.
///
/// The blocking client is built lazily on first use so that it is created on
/// a blocking-pool thread rather than inside the async runtime.
pub struct MassiveFetcher {
    api_key: String,
    base_url: String,
    client: OnceLock<Client>,
}

impl MassiveFetcher {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, MASSIVE_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&Client, FetchError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    pub fn snapshot_url(&self) -> String {
        format!("{}{SNAPSHOT_PATH}", self.base_url)
    }
}

impl SnapshotFetcher for MassiveFetcher {
    fn fetch(&self, symbols: &[String]) -> Result<Vec<Value>, FetchError> {
        let response = self
            .client()?
            .get(self.snapshot_url())
            .query(&[("tickers", symbols.join(",")), ("apiKey", self.api_key.clone())])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text()?;
        let envelope: SnapshotEnvelope = serde_json::from_str(&body)?;
        Ok(envelope.tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let fetcher = MassiveFetcher::with_base_url("key", "http://localhost:9000/");
        assert_eq!(
            fetcher.snapshot_url(),
            "http://localhost:9000/v2/snapshot/locale/us/markets/stocks/tickers"
        );
    }

    #[test]
    fn envelope_without_tickers_is_empty() {
        let envelope: SnapshotEnvelope =
            serde_json::from_str(r#"{"status":"OK"}"#).expect("envelope");
        assert!(envelope.tickers.is_empty());
    }
}

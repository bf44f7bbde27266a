use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use crate::constants::{MASSIVE_BASE_URL, POLL_INTERVAL_SECS};
use crate::logging;
use crate::massive::MassiveFetcher;
use crate::polled::PolledSource;
use crate::simulator::{SimulatedSource, SimulatorConfig};
use crate::source::DataSource;
use crate::store::QuoteStore;

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Upstream credential. Blank or missing selects the simulator.
    pub api_key: Option<String>,
    pub base_url: String,
    pub poll_interval: Duration,
    pub simulator: SimulatorConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: MASSIVE_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl SourceConfig {
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Builds the unstarted data source selected by `config`.
pub fn create_source(
    store: Arc<QuoteStore>,
    config: &SourceConfig,
) -> Result<Arc<dyn DataSource>> {
    match config.credential() {
        Some(api_key) => {
            logging::info(
                "source.selected",
                "Market data source: remote snapshot API",
                json!({
                    "kind": "polled",
                    "base_url": config.base_url,
                    "poll_interval_secs": config.poll_interval.as_secs_f64(),
                }),
            );
            let fetcher = Arc::new(MassiveFetcher::with_base_url(
                api_key,
                config.base_url.clone(),
            ));
            Ok(Arc::new(PolledSource::with_interval(
                store,
                fetcher,
                config.poll_interval,
            )))
        }
        None => {
            logging::info(
                "source.selected",
                "Market data source: GBM simulator",
                json!({ "kind": "simulator" }),
            );
            Ok(Arc::new(SimulatedSource::with_config(
                store,
                config.simulator.clone(),
            )?))
        }
    }
}

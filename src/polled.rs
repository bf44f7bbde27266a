use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time;

use crate::constants::POLL_INTERVAL_SECS;
use crate::error::FetchError;
use crate::logging;
use crate::model::{normalize_symbol, normalize_symbols};
use crate::source::{lock, shutdown_requested, DataSource, LoopSlot, UpdateLoop};
use crate::store::QuoteStore;

/// Remote snapshot lookup. Implementations block; the poller always calls
/// them from the blocking thread pool.
///
/// Each returned record is kept as raw JSON so that one malformed entry can
/// be rejected without discarding the rest of the batch.
pub trait SnapshotFetcher: Send + Sync + 'static {
    fn fetch(&self, symbols: &[String]) -> Result<Vec<Value>, FetchError>;
}

impl<F> SnapshotFetcher for F
where
    F: Fn(&[String]) -> Result<Vec<Value>, FetchError> + Send + Sync + 'static,
{
    fn fetch(&self, symbols: &[String]) -> Result<Vec<Value>, FetchError> {
        self(symbols)
    }
}

/// One symbol's last trade as reported by the upstream snapshot API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeSnapshot {
    pub ticker: String,
    #[serde(rename = "lastTrade", alias = "last_trade")]
    pub last_trade: LastTrade,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LastTrade {
    #[serde(rename = "p", alias = "price")]
    pub price: f64,
    /// Milliseconds since the epoch.
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp_ms: f64,
}

impl TradeSnapshot {
    pub fn parse(record: &Value) -> Result<Self, String> {
        let snapshot: TradeSnapshot =
            serde_json::from_value(record.clone()).map_err(|err| err.to_string())?;
        let price = snapshot.last_trade.price;
        if !price.is_finite() || price <= 0.0 {
            return Err(format!("non-positive price {price}"));
        }
        Ok(snapshot)
    }
}

#[derive(Clone)]
struct Poller {
    store: Arc<QuoteStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    symbols: Arc<Mutex<Vec<String>>>,
}

impl Poller {
    /// One fetch-and-write cycle. Returns how many records were stored.
    async fn poll_once(&self) -> usize {
        let targets = lock(&self.symbols).clone();
        if targets.is_empty() {
            return 0;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let requested = targets.len();
        let fetched = tokio::task::spawn_blocking(move || fetcher.fetch(&targets))
            .await
            .map_err(|err| FetchError::Task(err.to_string()))
            .and_then(|result| result);

        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                logging::error(
                    "polled.fetch_failed",
                    "Snapshot fetch failed; retrying on next interval",
                    json!({ "error": err.to_string() }),
                );
                return 0;
            }
        };

        let stored = self.store_batch(&records);
        logging::debug(
            "polled.cycle",
            "Snapshot poll complete",
            json!({ "stored": stored, "requested": requested }),
        );
        stored
    }

    /// Writes every valid record for a still-tracked symbol. The target list
    /// stays locked for the whole batch, so a symbol removed while the fetch
    /// was in flight is never written back.
    fn store_batch(&self, records: &[Value]) -> usize {
        let current = lock(&self.symbols);
        let mut stored = 0usize;
        for record in records {
            match TradeSnapshot::parse(record) {
                Ok(snapshot) if !is_tracked(&current, &snapshot.ticker) => {}
                Ok(snapshot) => {
                    self.store.write(
                        &snapshot.ticker,
                        snapshot.last_trade.price,
                        Some(snapshot.last_trade.timestamp_ms / 1000.0),
                    );
                    stored += 1;
                }
                Err(reason) => logging::warn(
                    "polled.record_skipped",
                    "Skipping malformed snapshot record",
                    json!({
                        "ticker": record.get("ticker").cloned().unwrap_or(Value::Null),
                        "reason": reason,
                    }),
                ),
            }
        }
        stored
    }
}

fn is_tracked(current: &[String], ticker: &str) -> bool {
    normalize_symbol(ticker).is_some_and(|ticker| current.contains(&ticker))
}

/// Data source that periodically pulls last-trade snapshots from a remote API.
pub struct PolledSource {
    poller: Poller,
    interval: Duration,
    update_loop: LoopSlot,
}

impl PolledSource {
    pub fn new(store: Arc<QuoteStore>, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        Self::with_interval(store, fetcher, Duration::from_secs(POLL_INTERVAL_SECS))
    }

    pub fn with_interval(
        store: Arc<QuoteStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        interval: Duration,
    ) -> Self {
        Self {
            poller: Poller {
                store,
                fetcher,
                symbols: Arc::new(Mutex::new(Vec::new())),
            },
            interval,
            update_loop: LoopSlot::default(),
        }
    }

    /// Runs a single poll cycle outside the background loop.
    pub async fn poll_once(&self) -> usize {
        self.poller.poll_once().await
    }
}

#[async_trait]
impl DataSource for PolledSource {
    async fn start(&self, symbols: Vec<String>) -> Result<()> {
        let symbols = normalize_symbols(&symbols);
        *lock(&self.poller.symbols) = symbols.clone();

        self.poller.poll_once().await;

        let poller = self.poller.clone();
        let interval = self.interval;
        self.update_loop.install(UpdateLoop::spawn(move |shutdown| {
            run_polls(poller, interval, shutdown)
        }));

        logging::info(
            "polled.start",
            "Snapshot poller started",
            json!({
                "symbols": symbols.len(),
                "interval_secs": interval.as_secs_f64(),
            }),
        );
        Ok(())
    }

    async fn stop(&self) {
        if let Some(update_loop) = self.update_loop.take() {
            update_loop.shutdown().await;
            logging::info_simple("polled.stop", "Snapshot poller stopped");
        }
    }

    async fn add_symbol(&self, symbol: &str) -> Result<()> {
        let Some(symbol) = normalize_symbol(symbol) else {
            return Ok(());
        };

        let added = {
            let mut symbols = lock(&self.poller.symbols);
            if symbols.contains(&symbol) {
                false
            } else {
                symbols.push(symbol.clone());
                true
            }
        };
        if added {
            logging::info(
                "polled.symbol_added",
                "Symbol will be fetched on next poll",
                json!({ "symbol": symbol }),
            );
        }
        Ok(())
    }

    async fn remove_symbol(&self, symbol: &str) -> Result<()> {
        let Some(symbol) = normalize_symbol(symbol) else {
            return Ok(());
        };

        {
            let mut symbols = lock(&self.poller.symbols);
            symbols.retain(|tracked| tracked != &symbol);
            self.poller.store.remove(&symbol);
        }
        logging::info(
            "polled.symbol_removed",
            "Symbol removed from poll targets",
            json!({ "symbol": symbol }),
        );
        Ok(())
    }

    fn symbols(&self) -> Vec<String> {
        lock(&self.poller.symbols).clone()
    }

    fn kind(&self) -> &'static str {
        "polled"
    }
}

async fn run_polls(poller: Poller, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = time::sleep(interval) => {}
        }
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = poller.poll_once() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(ticker: &str, price: f64, timestamp_ms: i64) -> Value {
        json!({ "ticker": ticker, "lastTrade": { "p": price, "t": timestamp_ms } })
    }

    fn fetcher<F>(f: F) -> F
    where
        F: Fn(&[String]) -> Result<Vec<Value>, FetchError> + Send + Sync + 'static,
    {
        f
    }

    fn source_with(
        store: &Arc<QuoteStore>,
        fetch: impl SnapshotFetcher,
        symbols: &[&str],
    ) -> PolledSource {
        let source = PolledSource::with_interval(
            Arc::clone(store),
            Arc::new(fetch),
            Duration::from_secs(60),
        );
        *lock(&source.poller.symbols) = symbols.iter().map(|s| s.to_string()).collect();
        source
    }

    #[tokio::test]
    async fn poll_writes_every_record() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(
            &store,
            fetcher(|_| {
                Ok(vec![
                    record("AAPL", 190.50, 1_707_580_800_000),
                    record("GOOGL", 175.25, 1_707_580_800_000),
                ])
            }),
            &["AAPL", "GOOGL"],
        );

        assert_eq!(source.poll_once().await, 2);
        assert_eq!(store.price("AAPL"), Some(190.50));
        assert_eq!(store.price("GOOGL"), Some(175.25));
    }

    #[tokio::test]
    async fn timestamps_convert_to_seconds() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(
            &store,
            fetcher(|_| Ok(vec![record("AAPL", 190.50, 1_707_580_800_000)])),
            &["AAPL"],
        );

        source.poll_once().await;
        let quote = store.read("AAPL").expect("quote");
        assert_eq!(quote.timestamp, 1_707_580_800.0);
    }

    #[tokio::test]
    async fn malformed_record_is_skipped_alone() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(
            &store,
            fetcher(|_| {
                Ok(vec![
                    record("AAPL", 190.50, 1_707_580_800_000),
                    json!({ "ticker": "BAD", "lastTrade": null }),
                    json!({ "ticker": "WRONG", "lastTrade": { "p": "190", "t": 1 } }),
                ])
            }),
            &["AAPL", "BAD", "WRONG"],
        );

        assert_eq!(source.poll_once().await, 1);
        assert_eq!(store.price("AAPL"), Some(190.50));
        assert!(store.read("BAD").is_none());
        assert!(store.read("WRONG").is_none());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_store_untouched() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(
            &store,
            fetcher(|_| Err(FetchError::Other("network error".into()))),
            &["AAPL"],
        );

        assert_eq!(source.poll_once().await, 0);
        assert!(store.read("AAPL").is_none());
        assert_eq!(store.current_version(), 0);
    }

    #[tokio::test]
    async fn empty_target_list_skips_fetch() {
        let store = Arc::new(QuoteStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = source_with(
            &store,
            fetcher(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }),
            &[],
        );

        source.poll_once().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn add_normalises_and_remove_evicts() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(&store, fetcher(|_| Ok(Vec::new())), &["AAPL", "GOOGL"]);
        store.write("AAPL", 190.0, None);

        source.add_symbol("  msft ").await.expect("add");
        source.add_symbol("MSFT").await.expect("add again");
        assert_eq!(source.symbols(), vec!["AAPL", "GOOGL", "MSFT"]);

        source.remove_symbol("aapl").await.expect("remove");
        assert_eq!(source.symbols(), vec!["GOOGL", "MSFT"]);
        assert!(store.read("AAPL").is_none());
    }

    #[tokio::test]
    async fn untracked_records_are_ignored() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(
            &store,
            fetcher(|_| {
                Ok(vec![
                    record("aapl", 190.50, 1_707_580_800_000),
                    record("TSLA", 250.00, 1_707_580_800_000),
                ])
            }),
            &["AAPL"],
        );

        assert_eq!(source.poll_once().await, 1);
        assert_eq!(store.price("AAPL"), Some(190.50));
        assert!(!store.contains("TSLA"));
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let store = Arc::new(QuoteStore::new());
        let source = source_with(&store, fetcher(|_| Ok(Vec::new())), &[]);
        source.stop().await;
        source.stop().await;
    }
}

pub mod correlation;
pub mod generator;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::constants::{EVENT_PROBABILITY, TICK_INTERVAL_MS};
use crate::logging;
use crate::model::{normalize_symbol, normalize_symbols};
use crate::source::{lock, shutdown_requested, DataSource, LoopSlot, UpdateLoop};
use crate::store::QuoteStore;

pub use generator::{PriceGenerator, DEFAULT_DT};

#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    pub tick_interval: Duration,
    pub event_probability: f64,
    pub dt: f64,
    /// Fixed RNG seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            event_probability: EVENT_PROBABILITY,
            dt: DEFAULT_DT,
            seed: None,
        }
    }
}

/// Data source that drives a [`PriceGenerator`] on a fixed timer.
pub struct SimulatedSource {
    store: Arc<QuoteStore>,
    config: SimulatorConfig,
    generator: Arc<Mutex<PriceGenerator>>,
    update_loop: LoopSlot,
}

impl SimulatedSource {
    pub fn new(store: Arc<QuoteStore>) -> Result<Self> {
        Self::with_config(store, SimulatorConfig::default())
    }

    pub fn with_config(store: Arc<QuoteStore>, config: SimulatorConfig) -> Result<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let generator = PriceGenerator::with_rng(&[], config.dt, config.event_probability, rng)?;
        Ok(Self {
            store,
            config,
            generator: Arc::new(Mutex::new(generator)),
            update_loop: LoopSlot::default(),
        })
    }

    pub fn current_price(&self, symbol: &str) -> Option<f64> {
        let symbol = normalize_symbol(symbol)?;
        lock(&self.generator).current_price(&symbol)
    }
}

#[async_trait]
impl DataSource for SimulatedSource {
    async fn start(&self, symbols: Vec<String>) -> Result<()> {
        let symbols = normalize_symbols(&symbols);

        let seeded: Vec<(String, f64)> = {
            let mut generator = lock(&self.generator);
            generator
                .initialize(&symbols)
                .context("simulator failed to build correlation structure")?;
            generator
                .symbols()
                .iter()
                .filter_map(|symbol| {
                    generator
                        .current_price(symbol)
                        .map(|price| (symbol.clone(), price))
                })
                .collect()
        };
        for (symbol, price) in &seeded {
            self.store.write(symbol, *price, None);
        }

        let generator = Arc::clone(&self.generator);
        let store = Arc::clone(&self.store);
        let interval = self.config.tick_interval;
        self.update_loop.install(UpdateLoop::spawn(move |shutdown| {
            run_updates(generator, store, interval, shutdown)
        }));

        logging::info(
            "simulator.start",
            "Simulator started",
            json!({
                "symbols": seeded.len(),
                "interval_ms": interval.as_millis() as u64,
            }),
        );
        Ok(())
    }

    async fn stop(&self) {
        if let Some(update_loop) = self.update_loop.take() {
            update_loop.shutdown().await;
            logging::info_simple("simulator.stop", "Simulator stopped");
        }
    }

    async fn add_symbol(&self, symbol: &str) -> Result<()> {
        let Some(symbol) = normalize_symbol(symbol) else {
            return Ok(());
        };

        {
            let mut generator = lock(&self.generator);
            if generator.current_price(&symbol).is_some() {
                return Ok(());
            }
            generator
                .add_symbol(&symbol)
                .with_context(|| format!("simulator failed to add {symbol}"))?;
            // Written under both locks; a racing remove or stop waits for it.
            if let Some(price) = generator.current_price(&symbol) {
                self.update_loop
                    .with_running(|| self.store.write(&symbol, price, None));
            }
        }
        logging::info(
            "simulator.symbol_added",
            "Simulator tracking new symbol",
            json!({ "symbol": symbol }),
        );
        Ok(())
    }

    async fn remove_symbol(&self, symbol: &str) -> Result<()> {
        let Some(symbol) = normalize_symbol(symbol) else {
            return Ok(());
        };

        {
            let mut generator = lock(&self.generator);
            generator
                .remove_symbol(&symbol)
                .with_context(|| format!("simulator failed to remove {symbol}"))?;
            self.store.remove(&symbol);
        }
        logging::info(
            "simulator.symbol_removed",
            "Simulator dropped symbol",
            json!({ "symbol": symbol }),
        );
        Ok(())
    }

    fn symbols(&self) -> Vec<String> {
        lock(&self.generator).symbols().to_vec()
    }

    fn kind(&self) -> &'static str {
        "simulator"
    }
}

async fn run_updates(
    generator: Arc<Mutex<PriceGenerator>>,
    store: Arc<QuoteStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        apply_step(&generator, &store);
    }
}

/// Steps the generator and writes the batch without releasing the generator
/// lock, so a symbol removed concurrently is never written back.
fn apply_step(generator: &Mutex<PriceGenerator>, store: &QuoteStore) {
    let mut generator = lock(generator);
    match generator.step() {
        Ok(prices) => {
            for (symbol, price) in prices {
                store.write(&symbol, price, None);
            }
        }
        Err(err) => logging::error(
            "simulator.step_failed",
            "Simulator step failed; retrying on next tick",
            json!({ "error": format!("{err:#}") }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> SimulatorConfig {
        SimulatorConfig {
            tick_interval: Duration::from_millis(10),
            seed: Some(42),
            ..SimulatorConfig::default()
        }
    }

    #[tokio::test]
    async fn start_seeds_store_before_first_tick() {
        let store = Arc::new(QuoteStore::new());
        let source = SimulatedSource::with_config(
            Arc::clone(&store),
            SimulatorConfig {
                tick_interval: Duration::from_secs(3600),
                ..fast_config()
            },
        )
        .expect("source");

        source
            .start(vec!["aapl".into(), "GOOGL".into()])
            .await
            .expect("start");

        assert_eq!(store.price("AAPL"), Some(190.0));
        assert_eq!(store.price("GOOGL"), Some(175.0));
        assert_eq!(store.current_version(), 2);
        assert_eq!(source.symbols(), vec!["AAPL".to_string(), "GOOGL".to_string()]);
        source.stop().await;
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let store = Arc::new(QuoteStore::new());
        let source = SimulatedSource::with_config(Arc::clone(&store), fast_config())
            .expect("source");
        source.start(vec!["AAPL".into()]).await.expect("start");

        source.stop().await;
        let frozen = store.current_version();
        source.stop().await;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.current_version(), frozen);
    }

    #[tokio::test]
    async fn add_symbol_before_start_waits_for_start() {
        let store = Arc::new(QuoteStore::new());
        let source = SimulatedSource::with_config(Arc::clone(&store), fast_config())
            .expect("source");

        source.add_symbol("nvda").await.expect("add");
        assert!(store.is_empty());
        assert_eq!(source.current_price("NVDA"), Some(800.0));
    }
}

use std::collections::HashMap;

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde_json::json;

use super::correlation;
use crate::constants::EVENT_PROBABILITY;
use crate::logging;
use crate::model::{seed_params, seed_price, GbmParams, SEED_PRICE_RANGE};
use crate::quote::round_to;

/// 252 trading days of 6.5 hours each.
pub const TRADING_SECONDS_PER_YEAR: f64 = 252.0 * 6.5 * 3600.0;
/// Half a second of trading time as a fraction of a trading year.
pub const DEFAULT_DT: f64 = 0.5 / TRADING_SECONDS_PER_YEAR;

const SHOCK_RANGE: (f64, f64) = (0.02, 0.05);

/// Correlated geometric Brownian motion over a dynamic symbol set.
///
/// Each [`step`](Self::step) draws one standard normal per symbol, correlates
/// them through the Cholesky factor of the sector correlation matrix and
/// applies `S *= exp((mu - sigma^2 / 2) dt + sigma sqrt(dt) Z)`. The factor is
/// recomputed whenever the symbol set changes.
pub struct PriceGenerator {
    symbols: Vec<String>,
    prices: HashMap<String, f64>,
    params: HashMap<String, GbmParams>,
    cholesky: Option<DMatrix<f64>>,
    dt: f64,
    event_probability: f64,
    rng: StdRng,
}

impl PriceGenerator {
    pub fn new(symbols: &[String]) -> Result<Self> {
        Self::with_rng(symbols, DEFAULT_DT, EVENT_PROBABILITY, StdRng::from_entropy())
    }

    pub fn with_rng(
        symbols: &[String],
        dt: f64,
        event_probability: f64,
        rng: StdRng,
    ) -> Result<Self> {
        let mut generator = Self {
            symbols: Vec::new(),
            prices: HashMap::new(),
            params: HashMap::new(),
            cholesky: None,
            dt,
            event_probability,
            rng,
        };
        generator.initialize(symbols)?;
        Ok(generator)
    }

    /// Seeds every symbol not yet tracked and builds the factor once over the
    /// whole set.
    pub fn initialize(&mut self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            self.seed(symbol);
        }
        self.rebuild()
    }

    pub fn step(&mut self) -> Result<Vec<(String, f64)>> {
        let n = self.symbols.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut draws = DVector::<f64>::zeros(n);
        for i in 0..n {
            draws[i] = self.rng.sample(StandardNormal);
        }
        let correlated = match &self.cholesky {
            Some(factor) if factor.nrows() == n => factor * draws,
            Some(factor) => bail!(
                "correlation factor is {}x{} but {n} symbols are active",
                factor.nrows(),
                factor.ncols()
            ),
            None if n < 2 => draws,
            None => bail!("correlation factor missing for {n} active symbols"),
        };

        let sqrt_dt = self.dt.sqrt();
        let mut next = Vec::with_capacity(n);
        for (idx, symbol) in self.symbols.iter().enumerate() {
            let params = self.params.get(symbol).copied().unwrap_or_default();
            let Some(&current) = self.prices.get(symbol) else {
                bail!("no price state for {symbol}");
            };

            let drift = (params.drift - 0.5 * params.volatility.powi(2)) * self.dt;
            let diffusion = params.volatility * sqrt_dt * correlated[idx];
            let mut price = current * (drift + diffusion).exp();

            if self.rng.gen::<f64>() < self.event_probability {
                let magnitude = self.rng.gen_range(SHOCK_RANGE.0..SHOCK_RANGE.1);
                let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                price *= 1.0 + sign * magnitude;
                logging::info(
                    "simulator.event",
                    "Random news event applied",
                    json!({
                        "symbol": symbol,
                        "shock_pct": round_to(sign * magnitude * 100.0, 2),
                    }),
                );
            }

            let rounded = round_to(price, 2);
            if !rounded.is_finite() || rounded <= 0.0 {
                bail!("step produced invalid price {rounded} for {symbol}");
            }
            next.push((symbol.clone(), rounded));
        }

        for (symbol, price) in &next {
            self.prices.insert(symbol.clone(), *price);
        }
        Ok(next)
    }

    /// No-op when already tracked; otherwise seeds and refactors.
    pub fn add_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.prices.contains_key(symbol) {
            return Ok(());
        }
        self.seed(symbol);
        self.rebuild()
    }

    pub fn remove_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.prices.remove(symbol).is_none() {
            return Ok(());
        }
        self.params.remove(symbol);
        self.symbols.retain(|tracked| tracked != symbol);
        self.rebuild()
    }

    pub fn current_price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn cholesky(&self) -> Option<&DMatrix<f64>> {
        self.cholesky.as_ref()
    }

    fn seed(&mut self, symbol: &str) {
        if self.prices.contains_key(symbol) {
            return;
        }
        let price = seed_price(symbol)
            .unwrap_or_else(|| self.rng.gen_range(SEED_PRICE_RANGE.0..SEED_PRICE_RANGE.1));
        self.symbols.push(symbol.to_string());
        self.prices.insert(symbol.to_string(), price);
        self.params.insert(symbol.to_string(), seed_params(symbol));
    }

    fn rebuild(&mut self) -> Result<()> {
        self.cholesky = correlation::factorize(&self.symbols)?;
        Ok(())
    }
}

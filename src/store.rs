use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::quote::{now_seconds, round_to, Quote};

/// Read side of the store as seen by stream distributors.
pub trait VersionedQuotes: Send + Sync {
    fn version(&self) -> u64;
    fn snapshot(&self) -> BTreeMap<String, Quote>;
}

#[derive(Default)]
struct Inner {
    quotes: BTreeMap<String, Quote>,
    version: u64,
}

/// Latest quote per symbol plus a version counter bumped on every write.
///
/// One writer (the active data source) and any number of readers share it
/// through an `Arc`. All access goes through a single mutex; critical
/// sections are bounded by the number of tracked symbols.
#[derive(Default)]
pub struct QuoteStore {
    inner: Mutex<Inner>,
}

impl QuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a price for `symbol`, stamping it with the current time when
    /// `timestamp` is `None`. The first write for a symbol is flat.
    pub fn write(&self, symbol: &str, price: f64, timestamp: Option<f64>) -> Quote {
        let symbol = symbol.trim().to_uppercase();
        let price = round_to(price, 2);
        let timestamp = timestamp.unwrap_or_else(now_seconds);

        let mut inner = self.lock();
        let previous_price = inner
            .quotes
            .get(&symbol)
            .map(|prior| prior.price)
            .unwrap_or(price);
        let quote = Quote {
            symbol: symbol.clone(),
            price,
            previous_price: round_to(previous_price, 2),
            timestamp,
        };
        inner.quotes.insert(symbol, quote.clone());
        inner.version += 1;
        quote
    }

    pub fn read(&self, symbol: &str) -> Option<Quote> {
        self.lock().quotes.get(&symbol.trim().to_uppercase()).cloned()
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.read(symbol).map(|quote| quote.price)
    }

    pub fn read_all(&self) -> BTreeMap<String, Quote> {
        self.lock().quotes.clone()
    }

    /// Evicts `symbol`. Does not bump the version.
    pub fn remove(&self, symbol: &str) {
        self.lock().quotes.remove(&symbol.trim().to_uppercase());
    }

    pub fn current_version(&self) -> u64 {
        self.lock().version
    }

    pub fn len(&self) -> usize {
        self.lock().quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().quotes.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.lock()
            .quotes
            .contains_key(&symbol.trim().to_uppercase())
    }
}

impl VersionedQuotes for QuoteStore {
    fn version(&self) -> u64 {
        self.current_version()
    }

    fn snapshot(&self) -> BTreeMap<String, Quote> {
        self.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Direction;
    use std::sync::Arc;

    #[test]
    fn first_write_is_flat_and_normalised() {
        let store = QuoteStore::new();
        let quote = store.write("aapl", 190.12345, None);

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, 190.12);
        assert_eq!(quote.previous_price, 190.12);
        assert_eq!(quote.direction(), Direction::Flat);
        assert_eq!(store.read("AAPL"), Some(quote));
    }

    #[test]
    fn second_write_carries_previous_price() {
        let store = QuoteStore::new();
        store.write("AAPL", 190.00, None);
        let quote = store.write("AAPL", 191.00, None);

        assert_eq!(quote.previous_price, 190.0);
        assert_eq!(quote.change(), 1.0);
        assert!((quote.change_percent() - 0.5263).abs() < 1e-9);
        assert_eq!(quote.direction(), Direction::Up);
    }

    #[test]
    fn version_counts_writes_only() {
        let store = QuoteStore::new();
        let before = store.current_version();
        let prices = [10.0, 11.111, 9.5, 12.0, 12.004];
        for (idx, price) in prices.iter().enumerate() {
            store.write(if idx % 2 == 0 { "A" } else { "B" }, *price, Some(1.0));
        }
        assert_eq!(store.current_version(), before + prices.len() as u64);

        let _ = store.read("A");
        let _ = store.read_all();
        store.remove("B");
        assert_eq!(store.current_version(), before + prices.len() as u64);
        assert_eq!(store.price("A"), Some(12.0));
    }

    #[test]
    fn remove_is_visible_and_idempotent() {
        let store = QuoteStore::new();
        store.write("AAPL", 190.0, None);
        store.write("MSFT", 420.0, None);

        store.remove("aapl");
        store.remove("AAPL");

        let snapshot = store.read_all();
        assert!(!snapshot.contains_key("AAPL"));
        assert!(snapshot.contains_key("MSFT"));
        assert_eq!(store.len(), 1);
        assert!(!store.contains("AAPL"));
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let store = QuoteStore::new();
        store.write("AAPL", 190.0, None);
        let snapshot = store.read_all();
        store.write("AAPL", 200.0, None);

        assert_eq!(snapshot["AAPL"].price, 190.0);
        assert_eq!(store.price("AAPL"), Some(200.0));
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let store = QuoteStore::new();
        let quote = store.write("AAPL", 190.5, Some(1_707_580_800.0));
        assert_eq!(quote.timestamp, 1_707_580_800.0);
    }

    #[test]
    fn concurrent_writers_never_lose_versions() {
        let store = Arc::new(QuoteStore::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for step in 0..250 {
                        store.write(&format!("S{worker}"), 100.0 + step as f64, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        assert_eq!(store.current_version(), 1_000);
        assert_eq!(store.len(), 4);
    }
}

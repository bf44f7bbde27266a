use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol that trades on its own story; every pair involving it falls back
/// to the cross-sector coefficient even though it sits in the tech table.
pub const INDEPENDENT_MOVER: &str = "TSLA";

pub const INTRA_TECH_CORR: f64 = 0.6;
pub const INTRA_FINANCE_CORR: f64 = 0.5;
pub const CROSS_GROUP_CORR: f64 = 0.3;
pub const INDEPENDENT_MOVER_CORR: f64 = 0.3;

pub const SEED_PRICE_RANGE: (f64, f64) = (50.0, 300.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Technology,
    Finance,
}

impl Sector {
    pub fn of(symbol: &str) -> Option<Sector> {
        match symbol {
            "AAPL" | "GOOGL" | "MSFT" | "AMZN" | "META" | "NVDA" | "NFLX" | "TSLA" => {
                Some(Sector::Technology)
            }
            "JPM" | "V" => Some(Sector::Finance),
            _ => None,
        }
    }

    pub fn intra_correlation(self) -> f64 {
        match self {
            Sector::Technology => INTRA_TECH_CORR,
            Sector::Finance => INTRA_FINANCE_CORR,
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Sector::Technology => "Technology",
            Sector::Finance => "Finance",
        };
        f.write_str(label)
    }
}

/// Annualised GBM parameters for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    pub drift: f64,
    pub volatility: f64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            drift: 0.05,
            volatility: 0.25,
        }
    }
}

pub fn seed_price(symbol: &str) -> Option<f64> {
    let price = match symbol {
        "AAPL" => 190.00,
        "GOOGL" => 175.00,
        "MSFT" => 420.00,
        "AMZN" => 185.00,
        "TSLA" => 250.00,
        "NVDA" => 800.00,
        "META" => 500.00,
        "JPM" => 195.00,
        "V" => 280.00,
        "NFLX" => 600.00,
        _ => return None,
    };
    Some(price)
}

pub fn seed_params(symbol: &str) -> GbmParams {
    let (volatility, drift) = match symbol {
        "AAPL" => (0.22, 0.05),
        "GOOGL" => (0.25, 0.05),
        "MSFT" => (0.20, 0.05),
        "AMZN" => (0.28, 0.05),
        "TSLA" => (0.50, 0.03),
        "NVDA" => (0.40, 0.08),
        "META" => (0.30, 0.05),
        "JPM" => (0.18, 0.04),
        "V" => (0.17, 0.04),
        "NFLX" => (0.35, 0.05),
        _ => return GbmParams::default(),
    };
    GbmParams { drift, volatility }
}

/// Trims and upper-cases a ticker. Returns `None` for blank input.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// Normalises every entry and drops blanks and duplicates, keeping first-seen
/// order.
pub fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for symbol in symbols {
        if let Some(symbol) = normalize_symbol(symbol.as_ref()) {
            if !out.contains(&symbol) {
                out.push(symbol);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_symbols_dedupes_in_order() {
        let symbols = normalize_symbols(["msft", " AAPL", "MSFT", "", "aapl "]);
        assert_eq!(symbols, vec!["MSFT".to_string(), "AAPL".to_string()]);
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_symbol("  aapl "), Some("AAPL".to_string()));
        assert_eq!(normalize_symbol("   "), None);
    }

    #[test]
    fn unknown_symbols_get_default_params() {
        assert_eq!(seed_params("ZZZZ"), GbmParams::default());
        assert_eq!(seed_price("ZZZZ"), None);
        assert_eq!(seed_params("TSLA").volatility, 0.50);
    }

    #[test]
    fn sector_lookup_covers_both_groups() {
        assert_eq!(Sector::of("NVDA"), Some(Sector::Technology));
        assert_eq!(Sector::of("JPM"), Some(Sector::Finance));
        assert_eq!(Sector::of("XOM"), None);
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

/// Latest observation for one symbol. Change metrics are derived on read.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub previous_price: f64,
    pub timestamp: f64,
}

impl Quote {
    pub fn change(&self) -> f64 {
        round_to(self.price - self.previous_price, 4)
    }

    pub fn change_percent(&self) -> f64 {
        if self.previous_price == 0.0 {
            return 0.0;
        }
        round_to(
            (self.price - self.previous_price) / self.previous_price * 100.0,
            4,
        )
    }

    pub fn direction(&self) -> Direction {
        if self.price > self.previous_price {
            Direction::Up
        } else if self.price < self.previous_price {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    pub fn to_wire(&self) -> QuoteWire {
        QuoteWire {
            symbol: self.symbol.clone(),
            price: self.price,
            previous_price: self.previous_price,
            timestamp: self.timestamp,
            change: self.change(),
            change_percent: self.change_percent(),
            direction: self.direction(),
        }
    }
}

/// Serialised form of a quote inside a stream frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteWire {
    pub symbol: String,
    pub price: f64,
    pub previous_price: f64,
    pub timestamp: f64,
    pub change: f64,
    pub change_percent: f64,
    pub direction: Direction,
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

pub fn now_seconds() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

pub const BIND_ADDR: &str = "127.0.0.1:8000";
pub const TICK_INTERVAL_MS: u64 = 500;
pub const POLL_INTERVAL_SECS: u64 = 15;
pub const STREAM_INTERVAL_MS: u64 = 500;
pub const RECONNECT_DELAY_MS: u64 = 1_000;
pub const EVENT_PROBABILITY: f64 = 0.001;
pub const API_KEY_ENV: &str = "MASSIVE_API_KEY";
pub const MASSIVE_BASE_URL: &str = "https://api.massive.com";
pub const FETCH_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_WATCHLIST: [&str; 10] = [
    "AAPL", "GOOGL", "MSFT", "AMZN", "TSLA", "NVDA", "META", "JPM", "V", "NFLX",
];

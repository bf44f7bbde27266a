use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::constants::{
    API_KEY_ENV, BIND_ADDR, DEFAULT_WATCHLIST, EVENT_PROBABILITY, MASSIVE_BASE_URL,
    POLL_INTERVAL_SECS, RECONNECT_DELAY_MS, STREAM_INTERVAL_MS, TICK_INTERVAL_MS,
};
use crate::factory::SourceConfig;
use crate::model::normalize_symbols;
use crate::server::ServerConfig;
use crate::simulator::{SimulatorConfig, DEFAULT_DT};
use crate::stream::StreamConfig;
use crate::tail::TailArgs;

#[derive(Debug, Parser)]
#[command(author, version, about = "Live market quote streaming server")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(self) -> Command {
        self.command.unwrap_or_default()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the data source and serve the quote stream over HTTP
    Run(RunArgs),
    /// Connect to a running server's stream and print incoming quotes
    Tail(TailArgs),
}

impl Default for Command {
    fn default() -> Self {
        Command::Run(RunArgs::parse_from(["run"]))
    }
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = BIND_ADDR)]
    pub bind: SocketAddr,

    /// Comma separated symbols to track at startup
    #[arg(long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,

    /// Remote snapshot API key; when blank the simulator is used
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the remote snapshot API
    #[arg(long, default_value = MASSIVE_BASE_URL)]
    pub base_url: String,

    /// Simulator tick interval in milliseconds
    #[arg(long, default_value_t = TICK_INTERVAL_MS)]
    pub tick_ms: u64,

    /// Remote poll interval in seconds
    #[arg(long, default_value_t = POLL_INTERVAL_SECS)]
    pub poll_secs: u64,

    /// Stream version check interval in milliseconds
    #[arg(long, default_value_t = STREAM_INTERVAL_MS)]
    pub stream_ms: u64,

    /// Per-symbol probability of a news shock on each simulator tick
    #[arg(long, default_value_t = EVENT_PROBABILITY)]
    pub event_probability: f64,

    /// Fixed simulator seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    pub fn into_config(self) -> Result<ServerConfig> {
        if !(0.0..=1.0).contains(&self.event_probability) {
            bail!(
                "event probability must be within [0, 1], got {}",
                self.event_probability
            );
        }
        if self.tick_ms == 0 || self.poll_secs == 0 || self.stream_ms == 0 {
            bail!("tick, poll and stream intervals must be non-zero");
        }

        let symbols = match self.symbols {
            Some(symbols) => normalize_symbols(&symbols),
            None => DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect(),
        };

        Ok(ServerConfig {
            bind_addr: self.bind,
            symbols,
            source: SourceConfig {
                api_key: self.api_key,
                base_url: self.base_url,
                poll_interval: Duration::from_secs(self.poll_secs),
                simulator: SimulatorConfig {
                    tick_interval: Duration::from_millis(self.tick_ms),
                    event_probability: self.event_probability,
                    dt: DEFAULT_DT,
                    seed: self.seed,
                },
            },
            stream: StreamConfig {
                poll_interval: Duration::from_millis(self.stream_ms),
                retry: Duration::from_millis(RECONNECT_DELAY_MS),
            },
        })
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tokio::time;

use crate::constants::{RECONNECT_DELAY_MS, STREAM_INTERVAL_MS};
use crate::logging;
use crate::quote::QuoteWire;
use crate::store::VersionedQuotes;

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub poll_interval: Duration,
    pub retry: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(STREAM_INTERVAL_MS),
            retry: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

/// One message pushed to a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Reconnect hint, always sent first.
    Retry(Duration),
    /// Full snapshot serialised as a JSON object keyed by symbol.
    Data(String),
}

impl Frame {
    /// Server-sent-events text encoding.
    pub fn to_sse(&self) -> String {
        match self {
            Frame::Retry(delay) => format!("retry: {}\n\n", delay.as_millis()),
            Frame::Data(payload) => format!("data: {payload}\n\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Long-lived connection to one subscriber.
#[async_trait]
pub trait SnapshotSink: Send {
    fn is_disconnected(&self) -> bool;
    async fn send(&mut self, frame: Frame) -> Result<(), SinkClosed>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    Disconnected,
    Cancelled,
}

pub fn encode_snapshot<Q: VersionedQuotes + ?Sized>(quotes: &Q) -> serde_json::Result<String> {
    let wire: BTreeMap<String, QuoteWire> = quotes
        .snapshot()
        .into_iter()
        .map(|(symbol, quote)| (symbol, quote.to_wire()))
        .collect();
    serde_json::to_string(&wire)
}

/// Wraps an encoded snapshot as a data frame. An encoding failure is logged
/// and yields no frame.
fn data_frame(encoded: serde_json::Result<String>, version: u64) -> Option<Frame> {
    match encoded {
        Ok(payload) => Some(Frame::Data(payload)),
        Err(err) => {
            logging::error(
                "stream.encode_failed",
                "Failed to encode snapshot; frame skipped",
                json!({ "version": version, "error": err.to_string() }),
            );
            None
        }
    }
}

/// Pushes a full snapshot to `sink` whenever the store version moves.
///
/// Returns when the subscriber goes away or `cancel` flips to `true`. Neither
/// is an error.
pub async fn run_distributor<Q, S>(
    quotes: &Q,
    sink: &mut S,
    config: &StreamConfig,
    mut cancel: watch::Receiver<bool>,
) -> StreamExit
where
    Q: VersionedQuotes + ?Sized,
    S: SnapshotSink + ?Sized,
{
    if sink.send(Frame::Retry(config.retry)).await.is_err() {
        return StreamExit::Disconnected;
    }

    let mut last_sent: Option<u64> = None;
    loop {
        if *cancel.borrow_and_update() {
            return StreamExit::Cancelled;
        }
        if sink.is_disconnected() {
            return StreamExit::Disconnected;
        }

        let version = quotes.version();
        if last_sent != Some(version) {
            if let Some(frame) = data_frame(encode_snapshot(quotes), version) {
                if sink.send(frame).await.is_err() {
                    return StreamExit::Disconnected;
                }
            }
            last_sent = Some(version);
        }

        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return StreamExit::Cancelled;
                }
            }
            _ = time::sleep(config.poll_interval) => {}
        }
    }
}

/// Runs one distributor and logs its lifecycle under `client`.
pub async fn serve_subscriber<Q, S>(
    quotes: &Q,
    mut sink: S,
    config: &StreamConfig,
    cancel: watch::Receiver<bool>,
    client: &str,
) -> StreamExit
where
    Q: VersionedQuotes + ?Sized,
    S: SnapshotSink,
{
    logging::info(
        "stream.client_connected",
        "Stream client connected",
        json!({ "client": client }),
    );
    let exit = run_distributor(quotes, &mut sink, config, cancel).await;
    let (event, message) = match exit {
        StreamExit::Disconnected => ("stream.client_disconnected", "Stream client disconnected"),
        StreamExit::Cancelled => ("stream.client_cancelled", "Stream cancelled by server"),
    };
    logging::info(event, message, json!({ "client": client }));
    exit
}

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::Args;
use futures_util::StreamExt;

use crate::constants::BIND_ADDR;
use crate::model::normalize_symbol;
use crate::quote::QuoteWire;

#[derive(Debug, Args, Clone)]
pub struct TailArgs {
    /// Server address to connect to
    #[arg(long, default_value = BIND_ADDR)]
    pub server: String,

    /// Filter quotes to a single symbol (e.g. AAPL)
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Stop after printing this many snapshots
    #[arg(short, long)]
    pub limit: Option<usize>,
}

pub async fn run(args: TailArgs) -> Result<()> {
    let url = format!("http://{}/api/stream/prices", args.server);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to {url}; run `market-quotes run` first"))?;
    if !response.status().is_success() {
        bail!("stream endpoint returned {}", response.status());
    }

    let filter = args.symbol.as_deref().and_then(normalize_symbol);
    let mut body = response.bytes_stream();
    let mut buffer = EventBuffer::default();
    let mut printed = 0usize;
    println!("Connected to {url}; streaming quotes...");

    while let Some(chunk) = body.next().await {
        for event in buffer.push(&chunk?)? {
            let Some(snapshot) = parse_data_event(&event)? else {
                continue;
            };

            for quote in snapshot.values() {
                if filter.as_ref().is_some_and(|symbol| symbol != &quote.symbol) {
                    continue;
                }
                println!(
                    "{:>16.3} | {:>8} | {:>10.2} | {:>+9.4} | {:>+8.4}% | {:?}",
                    quote.timestamp,
                    quote.symbol,
                    quote.price,
                    quote.change,
                    quote.change_percent,
                    quote.direction
                );
            }
            printed += 1;

            if args.limit.is_some_and(|limit| printed >= limit) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Accumulates raw body bytes and hands back complete SSE event blocks.
///
/// Events are decoded only once whole, so a multibyte character split across
/// chunks survives intact.
#[derive(Debug, Default)]
pub struct EventBuffer {
    bytes: Vec<u8>,
}

impl EventBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.bytes.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.bytes.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.bytes.drain(..end + 2).collect();
            events.push(String::from_utf8(block).context("stream event is not valid UTF-8")?);
        }
        Ok(events)
    }
}

/// Extracts the snapshot from one SSE event block; `None` for non-data
/// events such as the reconnect hint.
pub fn parse_data_event(event: &str) -> Result<Option<BTreeMap<String, QuoteWire>>> {
    let payload: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if payload.is_empty() {
        return Ok(None);
    }
    let snapshot = serde_json::from_str(&payload.join("\n")).context("malformed data frame")?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Direction;

    #[test]
    fn retry_event_has_no_snapshot() {
        assert!(parse_data_event("retry: 1000\n\n").expect("parse").is_none());
    }

    #[test]
    fn data_event_decodes_quotes() {
        let event = concat!(
            "data: {\"AAPL\":{\"symbol\":\"AAPL\",\"price\":191.0,\"previous_price\":190.0,",
            "\"timestamp\":1.5,\"change\":1.0,\"change_percent\":0.5263,\"direction\":\"up\"}}\n\n"
        );
        let snapshot = parse_data_event(event).expect("parse").expect("data");
        assert_eq!(snapshot["AAPL"].direction, Direction::Up);
        assert_eq!(snapshot["AAPL"].price, 191.0);
    }

    #[test]
    fn split_multibyte_character_is_reassembled() {
        let event = "data: {\"note\":\"caf\u{e9} \u{20ac}\"}\n\n".as_bytes();
        let euro = event.len() - 6;
        let mut buffer = EventBuffer::default();

        assert!(buffer.push(&event[..euro]).expect("push").is_empty());
        assert!(buffer.push(&event[euro..euro + 1]).expect("push").is_empty());
        let events = buffer.push(&event[euro + 1..]).expect("push");
        assert_eq!(events, vec!["data: {\"note\":\"caf\u{e9} \u{20ac}\"}\n\n".to_string()]);
    }

    #[test]
    fn one_chunk_may_carry_several_events() {
        let mut buffer = EventBuffer::default();
        let events = buffer
            .push(b"retry: 1000\n\ndata: {}\n\ndata: {")
            .expect("push");
        assert_eq!(events, vec!["retry: 1000\n\n", "data: {}\n\n"]);
        assert_eq!(buffer.push(b"}\n\n").expect("push"), vec!["data: {}\n\n"]);
    }
}

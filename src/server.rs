use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};

use crate::constants::{BIND_ADDR, DEFAULT_WATCHLIST};
use crate::factory::{create_source, SourceConfig};
use crate::logging;
use crate::quote::QuoteWire;
use crate::source::DataSource;
use crate::store::QuoteStore;
use crate::stream::{serve_subscriber, Frame, SinkClosed, SnapshotSink, StreamConfig};

const SUBSCRIBER_BUFFER: usize = 16;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub symbols: Vec<String>,
    pub source: SourceConfig,
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8000))),
            symbols: DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect(),
            source: SourceConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<QuoteStore>,
    pub source: Arc<dyn DataSource>,
    pub stream: StreamConfig,
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stream/prices", get(stream_prices))
        .route("/api/prices", get(all_prices))
        .route("/api/prices/:symbol", get(one_price))
        .route("/api/symbols", get(list_symbols))
        .route("/api/symbols/:symbol", post(add_symbol).delete(remove_symbol))
        .route("/api/health", get(health))
        .with_state(state)
}

/// Builds the store and data source, serves HTTP until SIGINT/SIGTERM, then
/// stops the source.
pub async fn run(config: ServerConfig) -> Result<()> {
    let store = Arc::new(QuoteStore::new());
    let source = create_source(Arc::clone(&store), &config.source)?;
    source
        .start(config.symbols.clone())
        .await
        .context("failed to start market data source")?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener at {}", config.bind_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signals_task = tokio::spawn(handle_signals(shutdown_tx));

    let state = AppState {
        store,
        source: Arc::clone(&source),
        stream: config.stream.clone(),
        shutdown: shutdown_rx,
    };
    let served = serve(listener, state).await;

    signals_task.abort();
    let _ = signals_task.await;
    source.stop().await;
    served
}

/// Serves `state` on `listener` until its shutdown watch flips to `true`.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    logging::info(
        "server.bind",
        "HTTP server listening",
        json!({ "addr": addr.to_string(), "source": state.source.kind() }),
    );

    let mut shutdown = state.shutdown.clone();
    let shutdown_signal = async move {
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    };

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("HTTP server terminated with error")?;

    logging::info_simple("server.stop", "HTTP server stopped");
    Ok(())
}

async fn handle_signals(shutdown_tx: watch::Sender<bool>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            logging::info(
                "signal.received",
                "SIGTERM received, initiating graceful shutdown",
                json!({ "signal": "SIGTERM" })
            );
        }
        _ = sigint.recv() => {
            logging::warn(
                "signal.received",
                "SIGINT received, initiating graceful shutdown",
                json!({ "signal": "SIGINT" })
            );
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Bridges a distributor to the SSE response body. The body side dropping
/// its receiver is how a client disconnect shows up here.
struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

#[async_trait]
impl SnapshotSink for ChannelSink {
    fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        let event = match frame {
            Frame::Retry(delay) => Event::default().retry(delay),
            Frame::Data(payload) => Event::default().data(payload),
        };
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }
}

async fn stream_prices(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<Event>(SUBSCRIBER_BUFFER);
    let AppState {
        store,
        stream,
        shutdown,
        ..
    } = state;

    tokio::spawn(async move {
        let client = peer.to_string();
        serve_subscriber(store.as_ref(), ChannelSink { tx }, &stream, shutdown, &client).await;
    });

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event), rx))
    });

    ([("x-accel-buffering", "no")], Sse::new(body))
}

async fn all_prices(State(state): State<AppState>) -> Json<BTreeMap<String, QuoteWire>> {
    Json(
        state
            .store
            .read_all()
            .into_iter()
            .map(|(symbol, quote)| (symbol, quote.to_wire()))
            .collect(),
    )
}

async fn one_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<QuoteWire>, StatusCode> {
    state
        .store
        .read(&symbol)
        .map(|quote| Json(quote.to_wire()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_symbols(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.source.symbols())
}

async fn add_symbol(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    match state.source.add_symbol(&symbol).await {
        Ok(()) => Json(state.source.symbols()).into_response(),
        Err(err) => internal_error("server.add_symbol_failed", &symbol, err),
    }
}

async fn remove_symbol(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    match state.source.remove_symbol(&symbol).await {
        Ok(()) => Json(state.source.symbols()).into_response(),
        Err(err) => internal_error("server.remove_symbol_failed", &symbol, err),
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "source": state.source.kind(),
        "symbols": state.store.len(),
        "version": state.store.current_version(),
    }))
}

fn internal_error(event: &str, symbol: &str, err: anyhow::Error) -> Response {
    let detail = format!("{err:#}");
    logging::error(
        event,
        "Symbol update failed",
        json!({ "symbol": symbol, "error": detail }),
    );
    (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response()
}

use crate::error::AppError;
use crate::market::binance::{connect_ticker_stream, encode_subscribe_frame, ticker_stream_names};
use crate::market::store::QuoteStoreHandle;
use crate::market::types::{
    parse_ticker_payload, StreamConnectionState, StreamStatusSnapshot, TickerKind,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const STATUS_HEARTBEAT_MS: u64 = 1_000;
const STATUS_ERROR_THROTTLE_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Applied { symbol: String, kind: TickerKind },
    UnknownSymbol { symbol: String },
    Ignored,
    Malformed { reason: String },
    /// Arrived while the connection was not open; never merged.
    Inactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub applied: u64,
    pub unknown_symbol: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub inactive: u64,
}

impl FrameCounters {
    pub fn dropped(&self) -> u64 {
        self.unknown_symbol
            .saturating_add(self.ignored)
            .saturating_add(self.malformed)
            .saturating_add(self.inactive)
    }
}

/// Connection state machine and frame-to-store mapping for one streaming
/// connection. Transport-agnostic: the driver feeds it open/message/close/error
/// events and sends whatever subscribe frames it hands back.
#[derive(Debug)]
pub struct StreamReconciler {
    store: QuoteStoreHandle,
    state: StreamConnectionState,
    pending: VecDeque<Vec<String>>,
    subscribed_streams: usize,
    next_request_id: u64,
    counters: FrameCounters,
}

impl StreamReconciler {
    pub fn new(store: QuoteStoreHandle) -> Self {
        Self {
            store,
            state: StreamConnectionState::Disconnected,
            pending: VecDeque::new(),
            subscribed_streams: 0,
            next_request_id: 1,
            counters: FrameCounters::default(),
        }
    }

    pub fn state(&self) -> StreamConnectionState {
        self.state
    }

    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    pub fn subscribed_streams(&self) -> usize {
        self.subscribed_streams
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn begin_connect(&mut self) -> bool {
        if self.state != StreamConnectionState::Disconnected {
            return false;
        }
        self.state = StreamConnectionState::Connecting;
        true
    }

    /// Hourly and daily streams for `symbols`. Returns the frame to send right
    /// away when open; otherwise the request is queued until `on_open`, or
    /// dropped once the connection is closed.
    pub fn subscribe<S: AsRef<str>>(&mut self, symbols: &[S]) -> Result<Option<String>, AppError> {
        let streams = ticker_stream_names(symbols);
        if streams.is_empty() || self.state.is_terminal() {
            return Ok(None);
        }
        if self.state == StreamConnectionState::Open {
            return self.encode_request(streams).map(Some);
        }
        self.pending.push_back(streams);
        Ok(None)
    }

    /// Transitions to `Open` and drains the queued requests exactly once.
    pub fn on_open(&mut self) -> Result<Vec<String>, AppError> {
        if !matches!(
            self.state,
            StreamConnectionState::Disconnected | StreamConnectionState::Connecting
        ) {
            return Ok(Vec::new());
        }
        self.state = StreamConnectionState::Open;

        let mut frames = Vec::with_capacity(self.pending.len());
        while let Some(streams) = self.pending.pop_front() {
            frames.push(self.encode_request(streams)?);
        }
        Ok(frames)
    }

    pub fn on_message(&mut self, payload: &mut [u8]) -> FrameOutcome {
        if self.state != StreamConnectionState::Open {
            self.counters.inactive = self.counters.inactive.saturating_add(1);
            return FrameOutcome::Inactive;
        }

        let event = match parse_ticker_payload(payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.counters.ignored = self.counters.ignored.saturating_add(1);
                return FrameOutcome::Ignored;
            }
            Err(error) => {
                self.counters.malformed = self.counters.malformed.saturating_add(1);
                return FrameOutcome::Malformed {
                    reason: error.to_string(),
                };
            }
        };

        if self.store.merge(event.symbol(), &event.patch()) {
            self.counters.applied = self.counters.applied.saturating_add(1);
            FrameOutcome::Applied {
                symbol: event.symbol().to_string(),
                kind: event.kind(),
            }
        } else {
            self.counters.unknown_symbol = self.counters.unknown_symbol.saturating_add(1);
            FrameOutcome::UnknownSymbol {
                symbol: event.symbol().to_string(),
            }
        }
    }

    pub fn on_close(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamConnectionState::Closed;
            self.pending.clear();
        }
    }

    pub fn on_error(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamConnectionState::Error;
            self.pending.clear();
        }
    }

    /// Idempotent teardown; `true` only for the call that actually closed.
    pub fn close(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = StreamConnectionState::Closed;
        self.pending.clear();
        true
    }

    pub fn status_snapshot(&self, reason: Option<String>) -> StreamStatusSnapshot {
        StreamStatusSnapshot {
            state: self.state,
            subscribed_streams: self.subscribed_streams,
            frames_applied: self.counters.applied,
            frames_dropped: self.counters.dropped(),
            reason,
        }
    }

    fn encode_request(&mut self, streams: Vec<String>) -> Result<String, AppError> {
        let id = self.next_request_id;
        let frame = encode_subscribe_frame(&streams, id)?;
        self.next_request_id = self.next_request_id.saturating_add(1);
        self.subscribed_streams = self.subscribed_streams.saturating_add(streams.len());
        Ok(frame)
    }
}

#[derive(Debug, Default)]
struct StatusPublishThrottle {
    last_state: Option<StreamConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

impl StatusPublishThrottle {
    fn allow(&mut self, state: StreamConnectionState, reason: &Option<String>) -> bool {
        let now = Instant::now();
        if self.last_state == Some(state)
            && self.last_reason == *reason
            && self
                .last_emit
                .map(|instant| {
                    now.duration_since(instant) < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
                })
                .unwrap_or(false)
        {
            return false;
        }

        self.last_state = Some(state);
        self.last_reason = reason.clone();
        self.last_emit = Some(now);
        true
    }
}

struct StreamRuntimeContext<'a> {
    status_store: &'a Arc<RwLock<StreamStatusSnapshot>>,
    cancel_token: &'a CancellationToken,
}

enum LoopEvent<T> {
    Cancelled,
    Heartbeat,
    Frame(Option<T>),
}

enum StreamDirective {
    Continue,
    Closed,
}

async fn publish_status(
    status_store: &Arc<RwLock<StreamStatusSnapshot>>,
    reconciler: &StreamReconciler,
    reason: Option<String>,
) {
    let snapshot = reconciler.status_snapshot(reason);
    let mut writable = status_store.write().await;
    *writable = snapshot;
}

async fn fail_stream(
    context: &StreamRuntimeContext<'_>,
    reconciler: &mut StreamReconciler,
    reason: String,
) -> StreamConnectionState {
    reconciler.on_error();
    error!(%reason, "ticker stream failed, not reconnecting");
    publish_status(context.status_store, reconciler, Some(reason)).await;
    reconciler.state()
}

/// Drives one streaming connection until the server closes it, it faults, or
/// `cancel_token` fires. Never reconnects; the returned state is terminal.
pub async fn run_ticker_stream(
    stream_url: String,
    symbols: Vec<String>,
    store: QuoteStoreHandle,
    status_store: Arc<RwLock<StreamStatusSnapshot>>,
    cancel_token: CancellationToken,
) -> StreamConnectionState {
    let context = StreamRuntimeContext {
        status_store: &status_store,
        cancel_token: &cancel_token,
    };
    let mut reconciler = StreamReconciler::new(store);
    let mut throttle = StatusPublishThrottle::default();

    if let Err(error) = reconciler.subscribe(&symbols) {
        return fail_stream(&context, &mut reconciler, format!("subscribe encode error: {error}"))
            .await;
    }
    reconciler.begin_connect();
    publish_status(
        context.status_store,
        &reconciler,
        Some("opening websocket stream".to_string()),
    )
    .await;

    let connected = tokio::select! {
        _ = context.cancel_token.cancelled() => None,
        result = connect_ticker_stream(&stream_url) => Some(result),
    };
    let mut websocket = match connected {
        None => {
            reconciler.close();
            publish_status(
                context.status_store,
                &reconciler,
                Some("stream cancelled before open".to_string()),
            )
            .await;
            return reconciler.state();
        }
        Some(Err(error)) => {
            return fail_stream(&context, &mut reconciler, format!("websocket connect error: {error}"))
                .await;
        }
        Some(Ok(websocket)) => websocket,
    };

    let frames = match reconciler.on_open() {
        Ok(frames) => frames,
        Err(error) => {
            let _ = websocket.close(None).await;
            return fail_stream(&context, &mut reconciler, format!("subscribe encode error: {error}"))
                .await;
        }
    };
    for frame in frames {
        if let Err(error) = websocket.send(Message::Text(frame)).await {
            return fail_stream(&context, &mut reconciler, format!("subscribe send error: {error}"))
                .await;
        }
    }
    info!(
        streams = reconciler.subscribed_streams(),
        symbols = symbols.len(),
        "ticker stream open"
    );
    publish_status(
        context.status_store,
        &reconciler,
        Some("websocket connected".to_string()),
    )
    .await;

    let mut heartbeat = tokio::time::interval(Duration::from_millis(STATUS_HEARTBEAT_MS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_reason: Option<String> = Some("websocket connected".to_string());

    loop {
        let event = tokio::select! {
            _ = context.cancel_token.cancelled() => LoopEvent::Cancelled,
            _ = heartbeat.tick() => LoopEvent::Heartbeat,
            next_message = websocket.next() => LoopEvent::Frame(next_message),
        };

        let frame = match event {
            LoopEvent::Cancelled => {
                if reconciler.close() {
                    let _ = websocket.close(None).await;
                }
                last_reason = Some("stream closed by owner".to_string());
                break;
            }
            LoopEvent::Heartbeat => {
                publish_status(context.status_store, &reconciler, last_reason.clone()).await;
                continue;
            }
            LoopEvent::Frame(frame) => frame,
        };

        let Some(frame_result) = frame else {
            reconciler.on_close();
            last_reason = Some("stream ended by server".to_string());
            break;
        };

        match frame_result {
            Ok(message) => {
                if let StreamDirective::Closed =
                    handle_message(message, &mut reconciler, &mut throttle, &mut last_reason)
                {
                    last_reason = Some("websocket closed by server".to_string());
                    break;
                }
            }
            Err(error) => {
                return fail_stream(&context, &mut reconciler, format!("websocket frame error: {error}"))
                    .await;
            }
        }
    }

    info!(
        state = ?reconciler.state(),
        applied = reconciler.counters().applied,
        dropped = reconciler.counters().dropped(),
        "ticker stream finished"
    );
    publish_status(context.status_store, &reconciler, last_reason).await;
    reconciler.state()
}

fn handle_message(
    message: Message,
    reconciler: &mut StreamReconciler,
    throttle: &mut StatusPublishThrottle,
    last_reason: &mut Option<String>,
) -> StreamDirective {
    let outcome = match message {
        Message::Text(text_payload) => {
            let mut owned_payload = text_payload.into_bytes();
            reconciler.on_message(owned_payload.as_mut_slice())
        }
        Message::Binary(mut binary_payload) => reconciler.on_message(binary_payload.as_mut_slice()),
        Message::Close(_) => {
            reconciler.on_close();
            return StreamDirective::Closed;
        }
        _ => return StreamDirective::Continue,
    };

    match outcome {
        FrameOutcome::Applied { symbol, kind } => trace!(%symbol, ?kind, "ticker merged"),
        FrameOutcome::UnknownSymbol { symbol } => {
            debug!(%symbol, "ticker for symbol outside snapshot dropped")
        }
        FrameOutcome::Ignored | FrameOutcome::Inactive => {}
        FrameOutcome::Malformed { reason } => {
            let reason = Some(format!("failed to decode ticker frame: {reason}"));
            if throttle.allow(reconciler.state(), &reason) {
                warn!(reason = reason.as_deref().unwrap_or_default(), "ticker frame dropped");
                *last_reason = reason;
            }
        }
    }
    StreamDirective::Continue
}

use crate::error::AppError;
use crate::market::types::{InstrumentDescriptor, NumericWire, TickerKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub type BinanceWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_METHOD: &str = "SUBSCRIBE";

fn ticker_24hr_endpoint(rest_base_url: &str) -> String {
    format!("{rest_base_url}/api/v3/ticker/24hr")
}

pub fn stream_name(symbol: &str, kind: TickerKind) -> String {
    format!("{}@{}", symbol.to_ascii_lowercase(), kind.stream_suffix())
}

/// Hourly then daily stream for every symbol, in snapshot order.
pub fn ticker_stream_names<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    symbols
        .iter()
        .flat_map(|symbol| {
            [
                stream_name(symbol.as_ref(), TickerKind::Hourly),
                stream_name(symbol.as_ref(), TickerKind::Daily),
            ]
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct SubscribeFrameWire<'a> {
    method: &'static str,
    params: &'a [String],
    id: u64,
}

pub fn encode_subscribe_frame(streams: &[String], id: u64) -> Result<String, AppError> {
    let frame = SubscribeFrameWire {
        method: SUBSCRIBE_METHOD,
        params: streams,
        id,
    };
    Ok(simd_json::serde::to_string(&frame)?)
}

pub async fn connect_ticker_stream(stream_url: &str) -> Result<BinanceWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(stream_url, Some(ws_config), true).await?;
    Ok(stream)
}

#[derive(Debug, Deserialize)]
struct Ticker24hrWire {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: NumericWire,
    volume: NumericWire,
}

impl TryFrom<Ticker24hrWire> for InstrumentDescriptor {
    type Error = AppError;

    fn try_from(value: Ticker24hrWire) -> Result<Self, Self::Error> {
        let last_price = value.last_price.to_f64()?;
        let volume = value.volume.to_f64()?;
        if last_price < 0.0 || volume < 0.0 {
            return Err(AppError::InvalidArgument(
                "ticker price/volume must be non-negative".to_string(),
            ));
        }

        Ok(Self {
            symbol: value.symbol.to_ascii_uppercase(),
            last_price,
            volume: Some(volume),
            market_cap: last_price * volume,
            name: None,
            icon: None,
        })
    }
}

/// Full 24h ticker universe restricted to pairs quoted in `quote_asset`.
/// Entries that fail to coerce are skipped rather than failing the batch.
pub async fn fetch_quoted_tickers(
    client: &Client,
    rest_base_url: &str,
    quote_asset: &str,
) -> Result<Vec<InstrumentDescriptor>, AppError> {
    let endpoint = ticker_24hr_endpoint(rest_base_url);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<Ticker24hrWire>>().await?;

    let mut descriptors = Vec::with_capacity(payload.len());
    for ticker in payload {
        if !ticker.symbol.to_ascii_uppercase().ends_with(quote_asset) {
            continue;
        }
        let symbol = ticker.symbol.clone();
        match InstrumentDescriptor::try_from(ticker) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(error) => debug!(%symbol, %error, "skipping malformed 24h ticker entry"),
        }
    }
    Ok(descriptors)
}

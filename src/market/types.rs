use crate::error::AppError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SOURCE: SnapshotSource = SnapshotSource::Binance;
pub const DEFAULT_REST_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_MARKET_CAP_BASE_URL: &str = "https://api.coingecko.com";
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_DISPLAY_COUNT: usize = 20;
pub const DEFAULT_QUOTE_ASSET: &str = "USDT";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const MIN_DISPLAY_COUNT: usize = 1;
pub const MAX_DISPLAY_COUNT: usize = 100;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;

pub const DAILY_TICKER_EVENT: &str = "24hrTicker";
pub const HOURLY_TICKER_EVENT: &str = "1hTicker";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Binance,
    CoinGecko,
}

impl SnapshotSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::CoinGecko => "coingecko",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Error,
}

impl StreamConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusSnapshot {
    pub state: StreamConnectionState,
    pub subscribed_streams: usize,
    pub frames_applied: u64,
    pub frames_dropped: u64,
    pub reason: Option<String>,
}

impl StreamStatusSnapshot {
    pub fn disconnected(reason: Option<String>) -> Self {
        Self {
            state: StreamConnectionState::Disconnected,
            subscribed_streams: 0,
            frames_applied: 0,
            frames_dropped: 0,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardArgs {
    pub source: Option<SnapshotSource>,
    pub rest_base_url: Option<String>,
    pub market_cap_base_url: Option<String>,
    pub stream_url: Option<String>,
    pub display_count: Option<usize>,
    pub quote_asset: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub source: SnapshotSource,
    pub rest_base_url: String,
    pub market_cap_base_url: String,
    pub stream_url: String,
    pub display_count: usize,
    pub quote_asset: String,
    pub request_timeout_ms: u64,
}

impl DashboardArgs {
    pub fn normalize(self) -> Result<DashboardConfig, AppError> {
        let source = self.source.unwrap_or(DEFAULT_SOURCE);
        let rest_base_url = normalize_url(
            self.rest_base_url,
            DEFAULT_REST_BASE_URL,
            &["http://", "https://"],
            "restBaseUrl",
        )?;
        let market_cap_base_url = normalize_url(
            self.market_cap_base_url,
            DEFAULT_MARKET_CAP_BASE_URL,
            &["http://", "https://"],
            "marketCapBaseUrl",
        )?;
        let stream_url = normalize_url(
            self.stream_url,
            DEFAULT_STREAM_URL,
            &["ws://", "wss://"],
            "streamUrl",
        )?;

        let display_count = self.display_count.unwrap_or(DEFAULT_DISPLAY_COUNT);
        if !(MIN_DISPLAY_COUNT..=MAX_DISPLAY_COUNT).contains(&display_count) {
            return Err(AppError::InvalidArgument(format!(
                "displayCount must be between {MIN_DISPLAY_COUNT} and {MAX_DISPLAY_COUNT}"
            )));
        }

        let quote_asset = self
            .quote_asset
            .unwrap_or_else(|| DEFAULT_QUOTE_ASSET.to_string())
            .trim()
            .to_ascii_uppercase();
        if quote_asset.is_empty() || !quote_asset.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidArgument(
                "quoteAsset must be non-empty alphanumeric ASCII".to_string(),
            ));
        }

        let request_timeout_ms = self
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&request_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "requestTimeoutMs must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }

        Ok(DashboardConfig {
            source,
            rest_base_url,
            market_cap_base_url,
            stream_url,
            display_count,
            quote_asset,
            request_timeout_ms,
        })
    }
}

fn normalize_url(
    value: Option<String>,
    default: &str,
    schemes: &[&str],
    field: &str,
) -> Result<String, AppError> {
    let raw = value.unwrap_or_else(|| default.to_string());
    let trimmed = raw.trim().trim_end_matches('/');
    let has_scheme = schemes.iter().any(|scheme| {
        trimmed.len() > scheme.len()
            && trimmed
                .get(..scheme.len())
                .map(|prefix| prefix.eq_ignore_ascii_case(scheme))
                .unwrap_or(false)
    });
    if !has_scheme {
        return Err(AppError::InvalidArgument(format!(
            "{field} must start with one of {}",
            schemes.join(", ")
        )));
    }
    Ok(trimmed.to_string())
}

/// Numeric field that may arrive as a JSON number or as a numeric string.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NumericWire {
    Number(f64),
    Text(String),
}

impl NumericWire {
    pub fn to_f64(&self) -> Result<f64, AppError> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(text) => text.trim().parse::<f64>()?,
        };
        if !value.is_finite() {
            return Err(AppError::InvalidArgument(
                "numeric field must be finite".to_string(),
            ));
        }
        Ok(value)
    }
}

/// One ranked entry produced by the snapshot fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentDescriptor {
    pub symbol: String,
    pub last_price: f64,
    pub volume: Option<f64>,
    pub market_cap: f64,
    pub name: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRow {
    pub symbol: String,
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent_1h: f64,
    pub price_change_percent_24h: f64,
    pub market_cap: f64,
    pub name: Option<String>,
    pub icon: Option<String>,
}

impl InstrumentRow {
    pub fn apply_patch(&mut self, patch: &RowPatch) {
        if let Some(last_price) = patch.last_price {
            self.last_price = last_price;
        }
        if let Some(price_change) = patch.price_change {
            self.price_change = price_change;
        }
        if let Some(percent) = patch.price_change_percent_1h {
            self.price_change_percent_1h = percent;
        }
        if let Some(percent) = patch.price_change_percent_24h {
            self.price_change_percent_24h = percent;
        }
    }
}

impl From<InstrumentDescriptor> for InstrumentRow {
    fn from(value: InstrumentDescriptor) -> Self {
        Self {
            symbol: value.symbol,
            last_price: value.last_price,
            price_change: 0.0,
            price_change_percent_1h: 0.0,
            price_change_percent_24h: 0.0,
            market_cap: value.market_cap,
            name: value.name,
            icon: value.icon,
        }
    }
}

/// Partial row update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RowPatch {
    pub last_price: Option<f64>,
    pub price_change: Option<f64>,
    pub price_change_percent_1h: Option<f64>,
    pub price_change_percent_24h: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerKind {
    Hourly,
    Daily,
}

impl TickerKind {
    /// Stream name suffix used in `SUBSCRIBE` params.
    pub fn stream_suffix(self) -> &'static str {
        match self {
            Self::Hourly => "ticker_1h",
            Self::Daily => "ticker",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TickerWire {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "s", default)]
    pub symbol: Option<String>,
    #[serde(rename = "c", default)]
    pub last_price: Option<NumericWire>,
    #[serde(rename = "p", default)]
    pub price_change: Option<NumericWire>,
    #[serde(rename = "P", default)]
    pub price_change_percent: Option<NumericWire>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickerEvent {
    Hourly {
        symbol: String,
        price_change_percent: f64,
    },
    Daily {
        symbol: String,
        last_price: f64,
        price_change: Option<f64>,
        price_change_percent: f64,
    },
}

impl TickerEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Hourly { symbol, .. } | Self::Daily { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> TickerKind {
        match self {
            Self::Hourly { .. } => TickerKind::Hourly,
            Self::Daily { .. } => TickerKind::Daily,
        }
    }

    /// Only the fields this kind of frame is allowed to touch.
    pub fn patch(&self) -> RowPatch {
        match self {
            Self::Hourly {
                price_change_percent,
                ..
            } => RowPatch {
                price_change_percent_1h: Some(*price_change_percent),
                ..RowPatch::default()
            },
            Self::Daily {
                last_price,
                price_change,
                price_change_percent,
                ..
            } => RowPatch {
                last_price: Some(*last_price),
                price_change: *price_change,
                price_change_percent_24h: Some(*price_change_percent),
                ..RowPatch::default()
            },
        }
    }
}

impl TickerWire {
    /// `Ok(None)` for frames that are not tickers (acks, unknown event types).
    pub fn into_event(self) -> Result<Option<TickerEvent>, AppError> {
        let kind = match self.event_type.as_deref() {
            Some(DAILY_TICKER_EVENT) => TickerKind::Daily,
            Some(HOURLY_TICKER_EVENT) => TickerKind::Hourly,
            _ => return Ok(None),
        };

        let symbol = self
            .symbol
            .map(|value| value.trim().to_ascii_uppercase())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::InvalidArgument("ticker frame without symbol".to_string()))?;
        let price_change_percent = required_numeric(self.price_change_percent, "P")?;

        match kind {
            TickerKind::Hourly => Ok(Some(TickerEvent::Hourly {
                symbol,
                price_change_percent,
            })),
            TickerKind::Daily => {
                let last_price = required_numeric(self.last_price, "c")?;
                if last_price < 0.0 {
                    return Err(AppError::InvalidArgument(
                        "last price must be non-negative".to_string(),
                    ));
                }
                let price_change = self
                    .price_change
                    .as_ref()
                    .map(NumericWire::to_f64)
                    .transpose()?;
                Ok(Some(TickerEvent::Daily {
                    symbol,
                    last_price,
                    price_change,
                    price_change_percent,
                }))
            }
        }
    }
}

fn required_numeric(value: Option<NumericWire>, field: &str) -> Result<f64, AppError> {
    value
        .ok_or_else(|| AppError::InvalidArgument(format!("ticker frame missing '{field}'")))?
        .to_f64()
}

pub fn parse_ticker_payload(payload: &mut [u8]) -> Result<Option<TickerEvent>, AppError> {
    let wire: TickerWire = simd_json::serde::from_slice(payload)?;
    wire.into_event()
}

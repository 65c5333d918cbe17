use crate::error::AppError;
use crate::market::types::{InstrumentDescriptor, NumericWire};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const VS_CURRENCY: &str = "usd";

fn markets_endpoint(market_cap_base_url: &str) -> String {
    format!("{market_cap_base_url}/api/v3/coins/markets?vs_currency={VS_CURRENCY}")
}

#[derive(Debug, Deserialize)]
struct CoinMarketWire {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    current_price: Option<NumericWire>,
    #[serde(default)]
    total_volume: Option<NumericWire>,
    #[serde(default)]
    market_cap: Option<NumericWire>,
}

impl CoinMarketWire {
    fn into_descriptor(self, quote_asset: &str) -> Result<InstrumentDescriptor, AppError> {
        let base = self.symbol.trim().to_ascii_uppercase();
        if base.is_empty() {
            return Err(AppError::InvalidArgument(
                "coin listing without symbol".to_string(),
            ));
        }
        let last_price = self
            .current_price
            .ok_or_else(|| AppError::InvalidArgument(format!("{base}: missing current_price")))?
            .to_f64()?;
        let market_cap = self
            .market_cap
            .ok_or_else(|| AppError::InvalidArgument(format!("{base}: missing market_cap")))?
            .to_f64()?;
        let volume = self
            .total_volume
            .as_ref()
            .map(NumericWire::to_f64)
            .transpose()?;
        if last_price < 0.0 || market_cap < 0.0 {
            return Err(AppError::InvalidArgument(format!(
                "{base}: price and market cap must be non-negative"
            )));
        }

        Ok(InstrumentDescriptor {
            symbol: format!("{base}{quote_asset}"),
            last_price,
            volume,
            market_cap,
            name: self.name,
            icon: self.image,
        })
    }
}

/// Coin listings mapped onto exchange symbols (`btc` -> `BTCUSDT`), carrying
/// the listing's own market cap, name and icon.
pub async fn fetch_coin_markets(
    client: &Client,
    market_cap_base_url: &str,
    quote_asset: &str,
) -> Result<Vec<InstrumentDescriptor>, AppError> {
    let endpoint = markets_endpoint(market_cap_base_url);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<CoinMarketWire>>().await?;

    let mut descriptors = Vec::with_capacity(payload.len());
    for listing in payload {
        let symbol = listing.symbol.clone();
        match listing.into_descriptor(quote_asset) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(error) => debug!(%symbol, %error, "skipping malformed coin listing"),
        }
    }
    Ok(descriptors)
}

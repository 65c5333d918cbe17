use crate::error::AppError;
use crate::market::binance::fetch_quoted_tickers;
use crate::market::coingecko::fetch_coin_markets;
use crate::market::types::{DashboardConfig, InstrumentDescriptor, SnapshotSource};
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

pub fn build_http_client(config: &DashboardConfig) -> Result<Client, AppError> {
    let client = Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()?;
    Ok(client)
}

/// Sorts descending by market cap (stable for ties) and keeps the first `limit`.
pub fn rank_top_n(
    mut descriptors: Vec<InstrumentDescriptor>,
    limit: usize,
) -> Vec<InstrumentDescriptor> {
    descriptors.sort_by(|lhs, rhs| rhs.market_cap.total_cmp(&lhs.market_cap));
    descriptors.truncate(limit);
    descriptors
}

async fn fetch_universe(
    client: &Client,
    config: &DashboardConfig,
) -> Result<Vec<InstrumentDescriptor>, AppError> {
    match config.source {
        SnapshotSource::Binance => {
            fetch_quoted_tickers(client, &config.rest_base_url, &config.quote_asset).await
        }
        SnapshotSource::CoinGecko => {
            fetch_coin_markets(client, &config.market_cap_base_url, &config.quote_asset).await
        }
    }
}

/// Top-N snapshot. A failed fetch degrades to an empty result ("no data yet").
pub async fn fetch_snapshot(client: &Client, config: &DashboardConfig) -> Vec<InstrumentDescriptor> {
    match fetch_universe(client, config).await {
        Ok(universe) => {
            let universe_len = universe.len();
            let ranked = rank_top_n(universe, config.display_count);
            info!(
                source = config.source.as_str(),
                universe = universe_len,
                ranked = ranked.len(),
                "snapshot loaded"
            );
            ranked
        }
        Err(error) => {
            warn!(
                source = config.source.as_str(),
                %error,
                "snapshot fetch failed, no data until reload"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::DashboardArgs;
    use crate::test_support::{spawn_http_server, unused_local_url};
    use proptest::prelude::*;

    fn descriptor(symbol: &str, market_cap: f64) -> InstrumentDescriptor {
        InstrumentDescriptor {
            symbol: symbol.to_string(),
            last_price: 1.0,
            volume: None,
            market_cap,
            name: None,
            icon: None,
        }
    }

    fn config_for(source: SnapshotSource, base_url: &str, display_count: usize) -> DashboardConfig {
        DashboardArgs {
            source: Some(source),
            rest_base_url: Some(base_url.to_string()),
            market_cap_base_url: Some(base_url.to_string()),
            display_count: Some(display_count),
            request_timeout_ms: Some(2_000),
            ..DashboardArgs::default()
        }
        .normalize()
        .expect("test config should be valid")
    }

    #[test]
    fn ranks_by_market_cap_descending() {
        let ranked = rank_top_n(
            vec![
                descriptor("AAAUSDT", 500.0),
                descriptor("BBBUSDT", 900.0),
                descriptor("CCCUSDT", 100.0),
            ],
            20,
        );
        let symbols: Vec<&str> = ranked.iter().map(|entry| entry.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBBUSDT", "AAAUSDT", "CCCUSDT"]);
    }

    #[test]
    fn keeps_input_order_for_equal_caps() {
        let ranked = rank_top_n(
            vec![descriptor("FIRST", 10.0), descriptor("SECOND", 10.0)],
            2,
        );
        assert_eq!(ranked[0].symbol, "FIRST");
        assert_eq!(ranked[1].symbol, "SECOND");
    }

    proptest! {
        #[test]
        fn ranking_truncates_and_sorts_descending(
            caps in prop::collection::vec(0.0f64..1e12, 0..40),
            limit in 1usize..30,
        ) {
            let descriptors = caps
                .iter()
                .enumerate()
                .map(|(index, cap)| descriptor(&format!("C{index}USDT"), *cap))
                .collect();
            let ranked = rank_top_n(descriptors, limit);

            prop_assert_eq!(ranked.len(), caps.len().min(limit));
            prop_assert!(ranked
                .windows(2)
                .all(|pair| pair[0].market_cap >= pair[1].market_cap));
        }
    }

    #[tokio::test]
    async fn fetches_and_ranks_quoted_binance_tickers() {
        let body = r#"[
            {"symbol":"BTCUSDT","lastPrice":"100.0","volume":"5.0","priceChange":"1.0","priceChangePercent":"1.0"},
            {"symbol":"ETHUSDT","lastPrice":"10.0","volume":"90.0","priceChange":"1.0","priceChangePercent":"1.0"},
            {"symbol":"ETHBTC","lastPrice":"0.05","volume":"1000000.0","priceChange":"0.0","priceChangePercent":"0.0"},
            {"symbol":"BADUSDT","lastPrice":"oops","volume":"1.0","priceChange":"0.0","priceChangePercent":"0.0"},
            {"symbol":"XRPUSDT","lastPrice":"1.0","volume":"100.0","priceChange":"0.0","priceChangePercent":"0.0"}
        ]"#;
        let base_url = spawn_http_server("HTTP/1.1 200 OK", body.to_string()).await;
        let config = config_for(SnapshotSource::Binance, &base_url, 2);
        let client = build_http_client(&config).expect("client should build");

        let snapshot = fetch_snapshot(&client, &config).await;

        let symbols: Vec<&str> = snapshot.iter().map(|entry| entry.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETHUSDT", "BTCUSDT"]);
        assert_eq!(snapshot[0].market_cap, 900.0);
    }

    #[tokio::test]
    async fn fetches_coin_listings_with_display_metadata() {
        let body = r#"[
            {"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://img/btc.png","current_price":64000,"total_volume":100,"market_cap":1200000000000},
            {"id":"ghost","symbol":"gst","name":"Ghost","image":null,"current_price":1.0,"total_volume":null,"market_cap":null},
            {"id":"ethereum","symbol":"eth","name":"Ethereum","image":"https://img/eth.png","current_price":3000.5,"total_volume":50,"market_cap":360000000000}
        ]"#;
        let base_url = spawn_http_server("HTTP/1.1 200 OK", body.to_string()).await;
        let config = config_for(SnapshotSource::CoinGecko, &base_url, 20);
        let client = build_http_client(&config).expect("client should build");

        let snapshot = fetch_snapshot(&client, &config).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].symbol, "BTCUSDT");
        assert_eq!(snapshot[0].name.as_deref(), Some("Bitcoin"));
        assert_eq!(snapshot[1].symbol, "ETHUSDT");
        assert_eq!(snapshot[1].last_price, 3000.5);
    }

    #[tokio::test]
    async fn http_error_status_degrades_to_empty_snapshot() {
        let base_url =
            spawn_http_server("HTTP/1.1 500 Internal Server Error", "{}".to_string()).await;
        let config = config_for(SnapshotSource::Binance, &base_url, 20);
        let client = build_http_client(&config).expect("client should build");

        assert!(fetch_snapshot(&client, &config).await.is_empty());
    }

    #[tokio::test]
    async fn network_fault_degrades_to_empty_snapshot() {
        let base_url = unused_local_url("http").await;
        let config = config_for(SnapshotSource::Binance, &base_url, 20);
        let client = build_http_client(&config).expect("client should build");

        assert!(fetch_snapshot(&client, &config).await.is_empty());
    }
}

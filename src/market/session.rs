use crate::error::AppError;
use crate::market::reconciler::run_ticker_stream;
use crate::market::snapshot::{build_http_client, fetch_snapshot};
use crate::market::store::QuoteStoreHandle;
use crate::market::types::{
    DashboardConfig, InstrumentRow, StreamConnectionState, StreamStatusSnapshot,
};
use crate::market::view::{DerivedView, FilterMode, SortState, ViewPipeline};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct StreamTaskHandle {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<StreamConnectionState>,
}

/// One mounted dashboard: its own store, view pipeline and streaming
/// connection. Dropping it without `unmount` still cancels the background
/// tasks.
pub struct DashboardSession {
    config: DashboardConfig,
    client: Client,
    store: QuoteStoreHandle,
    view: ViewPipeline,
    view_cancel: CancellationToken,
    view_task: Option<JoinHandle<()>>,
    stream: Option<StreamTaskHandle>,
    status: Arc<RwLock<StreamStatusSnapshot>>,
    mounted: bool,
}

impl DashboardSession {
    pub async fn mount(config: DashboardConfig) -> Result<Self, AppError> {
        let client = build_http_client(&config)?;
        let store = QuoteStoreHandle::new();
        let view = ViewPipeline::new(store.clone());
        let view_cancel = CancellationToken::new();
        let view_task = tokio::spawn(view.clone().run(view_cancel.clone()));

        let mut session = Self {
            config,
            client,
            store,
            view,
            view_cancel,
            view_task: Some(view_task),
            stream: None,
            status: Arc::new(RwLock::new(StreamStatusSnapshot::disconnected(Some(
                "stream idle".to_string(),
            )))),
            mounted: true,
        };
        session.load_and_stream().await;
        Ok(session)
    }

    /// Refetches the snapshot into the same store and restarts the stream
    /// with a fresh reconciler. Returns the number of rows loaded.
    pub async fn reload(&mut self) -> Result<usize, AppError> {
        if !self.mounted {
            return Err(AppError::InvalidArgument(
                "dashboard session is unmounted".to_string(),
            ));
        }
        self.stop_stream().await;
        Ok(self.load_and_stream().await)
    }

    pub async fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.stop_stream().await;

        self.view_cancel.cancel();
        if let Some(view_task) = self.view_task.take() {
            let _ = view_task.await;
        }
        info!("dashboard unmounted");
    }

    pub fn set_filter(&self, filter: FilterMode) {
        self.view.set_filter(filter);
    }

    pub fn toggle_hourly_sort(&self) -> SortState {
        self.view.toggle_hourly_sort()
    }

    pub fn toggle_daily_sort(&self) -> SortState {
        self.view.toggle_daily_sort()
    }

    pub fn view(&self) -> watch::Receiver<Arc<DerivedView>> {
        self.view.subscribe()
    }

    pub fn current_view(&self) -> Arc<DerivedView> {
        self.view.current()
    }

    pub async fn status(&self) -> StreamStatusSnapshot {
        self.status.read().await.clone()
    }

    pub fn store(&self) -> &QuoteStoreHandle {
        &self.store
    }

    pub fn rows(&self) -> Vec<InstrumentRow> {
        self.store.snapshot()
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    async fn load_and_stream(&mut self) -> usize {
        let snapshot = fetch_snapshot(&self.client, &self.config).await;
        self.store
            .load(snapshot.into_iter().map(InstrumentRow::from).collect());
        let loaded = self.store.len();

        if loaded == 0 {
            warn!("empty snapshot, live stream not started");
            *self.status.write().await =
                StreamStatusSnapshot::disconnected(Some("no instruments loaded".to_string()));
            return loaded;
        }

        let cancellation_token = CancellationToken::new();
        let join_handle = tokio::spawn(run_ticker_stream(
            self.config.stream_url.clone(),
            self.store.symbols(),
            self.store.clone(),
            Arc::clone(&self.status),
            cancellation_token.clone(),
        ));
        self.stream = Some(StreamTaskHandle {
            cancellation_token,
            join_handle,
        });
        loaded
    }

    async fn stop_stream(&mut self) {
        let Some(handle) = self.stream.take() else {
            return;
        };
        handle.cancellation_token.cancel();
        match handle.join_handle.await {
            Ok(state) => info!(?state, "ticker stream stopped"),
            Err(error) => warn!(%error, "ticker stream task failed"),
        }
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.stream {
            handle.cancellation_token.cancel();
        }
        self.view_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::{DashboardArgs, RowPatch, SnapshotSource};
    use crate::test_support::{spawn_http_server, spawn_ticker_server, unused_local_url};
    use std::time::Duration;

    const TICKERS: &str = r#"[
        {"symbol":"ETHUSDT","lastPrice":"10.0","volume":"90.0"},
        {"symbol":"BTCUSDT","lastPrice":"100.0","volume":"5.0"},
        {"symbol":"SOLUSDT","lastPrice":"1.0","volume":"100.0"},
        {"symbol":"ETHBTC","lastPrice":"0.05","volume":"1000000.0"}
    ]"#;

    fn config(rest_base_url: &str, stream_url: &str) -> DashboardConfig {
        DashboardArgs {
            source: Some(SnapshotSource::Binance),
            rest_base_url: Some(rest_base_url.to_string()),
            stream_url: Some(stream_url.to_string()),
            request_timeout_ms: Some(2_000),
            ..DashboardArgs::default()
        }
        .normalize()
        .expect("test config should be valid")
    }

    fn symbols(rows: &[InstrumentRow]) -> Vec<&str> {
        rows.iter().map(|entry| entry.symbol.as_str()).collect()
    }

    async fn wait_for_view<F>(receiver: &mut watch::Receiver<Arc<DerivedView>>, predicate: F)
    where
        F: Fn(&DerivedView) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if predicate(&receiver.borrow_and_update()) {
                    return;
                }
                receiver.changed().await.expect("view pipeline alive");
            }
        })
        .await
        .expect("view should reach the expected state");
    }

    #[tokio::test]
    async fn mount_loads_ranked_snapshot_and_applies_live_frames() {
        let rest_base_url = spawn_http_server("HTTP/1.1 200 OK", TICKERS.to_string()).await;
        let server = spawn_ticker_server(
            vec![
                r#"{"e":"1hTicker","s":"BTCUSDT","P":"1.5"}"#.to_string(),
                r#"{"e":"24hrTicker","s":"BTCUSDT","c":"50000","P":"2.0"}"#.to_string(),
            ],
            false,
        )
        .await;

        let mut session = DashboardSession::mount(config(&rest_base_url, &server.url))
            .await
            .expect("session should mount");
        assert_eq!(symbols(&session.rows()), vec!["ETHUSDT", "BTCUSDT", "SOLUSDT"]);

        let subscribe = server.subscribe_frame.await.expect("subscription was sent");
        assert!(subscribe.contains("btcusdt@ticker_1h"));
        assert!(subscribe.contains("solusdt@ticker"));

        let mut view = session.view();
        wait_for_view(&mut view, |current| {
            current
                .rows
                .iter()
                .any(|row| row.symbol == "BTCUSDT" && row.last_price == 50_000.0)
        })
        .await;

        session.set_filter(FilterMode::Up);
        wait_for_view(&mut view, |current| current.filter == FilterMode::Up).await;
        assert_eq!(symbols(&session.current_view().rows), vec!["BTCUSDT"]);
        assert_eq!(session.status().await.state, StreamConnectionState::Open);

        session.unmount().await;
        session.unmount().await;
        tokio::time::timeout(Duration::from_secs(5), server.client_closed)
            .await
            .expect("server should observe the close")
            .expect("server task alive");
        assert_eq!(session.status().await.state, StreamConnectionState::Closed);
        assert!(!session.is_mounted());
    }

    #[tokio::test]
    async fn empty_snapshot_does_not_open_a_stream() {
        let rest_base_url =
            spawn_http_server("HTTP/1.1 503 Service Unavailable", "{}".to_string()).await;
        let stream_url = unused_local_url("ws").await;

        let mut session = DashboardSession::mount(config(&rest_base_url, &stream_url))
            .await
            .expect("session should mount");

        assert!(session.rows().is_empty());
        assert!(session.current_view().rows.is_empty());
        let status = session.status().await;
        assert_eq!(status.state, StreamConnectionState::Disconnected);
        assert_eq!(status.subscribed_streams, 0);

        session.unmount().await;
        assert!(session.reload().await.is_err());
    }

    #[tokio::test]
    async fn reload_replaces_store_contents() {
        let rest_base_url = spawn_http_server("HTTP/1.1 200 OK", TICKERS.to_string()).await;
        let stream_url = unused_local_url("ws").await;
        let mut session = DashboardSession::mount(config(&rest_base_url, &stream_url))
            .await
            .expect("session should mount");

        session.store().merge(
            "BTCUSDT",
            &RowPatch {
                last_price: Some(1.0),
                ..RowPatch::default()
            },
        );
        assert_eq!(
            session.store().get("BTCUSDT").map(|row| row.last_price),
            Some(1.0)
        );

        let loaded = session.reload().await.expect("mounted session reloads");
        assert_eq!(loaded, 3);
        assert_eq!(
            session.store().get("BTCUSDT").map(|row| row.last_price),
            Some(100.0)
        );

        session.unmount().await;
    }

    #[tokio::test]
    async fn sort_toggles_are_mutually_exclusive_through_session() {
        let rest_base_url = spawn_http_server("HTTP/1.1 200 OK", "[]".to_string()).await;
        let stream_url = unused_local_url("ws").await;
        let mut session = DashboardSession::mount(config(&rest_base_url, &stream_url))
            .await
            .expect("session should mount");

        let after_daily = session.toggle_daily_sort();
        assert!(after_daily.daily.is_active());
        let after_hourly = session.toggle_hourly_sort();
        assert!(after_hourly.hourly.is_active());
        assert!(!after_hourly.daily.is_active());

        session.unmount().await;
    }
}

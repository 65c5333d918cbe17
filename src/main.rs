use cryptoboard_lib::error::AppError;
use cryptoboard_lib::market::format::{
    format_change_percent, format_market_cap, format_price, sort_indicator,
};
use cryptoboard_lib::market::session::DashboardSession;
use cryptoboard_lib::market::types::{DashboardArgs, StreamStatusSnapshot};
use cryptoboard_lib::market::view::DerivedView;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

const RENDER_INTERVAL_MS: u64 = 250;
const DEFAULT_LOG_FILTER: &str = "cryptoboard=info,cryptoboard_lib=info";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn render_table(view: &DerivedView, status: &StreamStatusSnapshot) -> String {
    let mut table = String::new();
    let _ = writeln!(
        table,
        "stream: {:?} ({} streams, {} applied, {} dropped){}",
        status.state,
        status.subscribed_streams,
        status.frames_applied,
        status.frames_dropped,
        status
            .reason
            .as_deref()
            .map(|reason| format!(" - {reason}"))
            .unwrap_or_default(),
    );
    let _ = writeln!(table, "filter: {:?}", view.filter);
    let _ = writeln!(
        table,
        "{:>3}  {:<12} {:>16} {:>10} {:>10} {:>14}",
        "#",
        "Symbol",
        "Price",
        format!("1h{}", sort_indicator(view.sort.hourly)),
        format!("24h{}", sort_indicator(view.sort.daily)),
        "Market cap",
    );

    if view.rows.is_empty() {
        let _ = writeln!(table, "no data");
        return table;
    }
    for (rank, row) in view.rows.iter().enumerate() {
        let _ = writeln!(
            table,
            "{:>3}  {:<12} {:>16} {:>10} {:>10} {:>14}",
            rank + 1,
            row.symbol,
            format_price(row.last_price),
            format_change_percent(row.price_change_percent_1h),
            format_change_percent(row.price_change_percent_24h),
            format_market_cap(row.market_cap),
        );
    }
    table
}

async fn draw(session: &DashboardSession, view: &DerivedView) -> Result<(), AppError> {
    let status = session.status().await;
    let table = render_table(view, &status);
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(b"\x1b[2J\x1b[H")?;
    stdout.write_all(table.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();

    let config = DashboardArgs::default().normalize()?;
    info!(
        source = config.source.as_str(),
        display_count = config.display_count,
        "cryptoboard starting"
    );
    let mut session = DashboardSession::mount(config).await?;

    let mut view_changes = session.view();
    let mut render_ticker = tokio::time::interval(Duration::from_millis(RENDER_INTERVAL_MS));
    render_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let initial = session.current_view();
    draw(&session, &initial).await?;

    let outcome = loop {
        tokio::select! {
            result = &mut shutdown => break result.map_err(AppError::from),
            _ = render_ticker.tick() => {
                if !view_changes.has_changed().unwrap_or(false) {
                    continue;
                }
                let view = Arc::clone(&view_changes.borrow_and_update());
                if let Err(error) = draw(&session, &view).await {
                    break Err(error);
                }
            }
        }
    };

    session.unmount().await;
    info!("cryptoboard stopped");
    outcome
}

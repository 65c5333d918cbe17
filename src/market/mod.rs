pub mod binance;
pub mod coingecko;
pub mod format;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod view;

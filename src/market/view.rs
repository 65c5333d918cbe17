use crate::market::store::QuoteStoreHandle;
use crate::market::types::InstrumentRow;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    All,
    Up,
    Down,
}

impl FilterMode {
    pub fn accepts(self, row: &InstrumentRow) -> bool {
        match self {
            Self::All => true,
            Self::Up => row.price_change_percent_24h > 0.0,
            Self::Down => row.price_change_percent_24h < 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    None,
    Asc,
    Desc,
}

impl SortOrder {
    /// `none -> asc -> desc -> none`
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Asc,
            Self::Asc => Self::Desc,
            Self::Desc => Self::None,
        }
    }

    pub fn is_active(self) -> bool {
        self != Self::None
    }
}

/// Two toggles, at most one of which is active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SortState {
    pub hourly: SortOrder,
    pub daily: SortOrder,
}

impl SortState {
    pub fn toggle_hourly(&mut self) {
        self.hourly = self.hourly.next();
        if self.hourly.is_active() {
            self.daily = SortOrder::None;
        }
    }

    pub fn toggle_daily(&mut self) {
        self.daily = self.daily.next();
        if self.daily.is_active() {
            self.hourly = SortOrder::None;
        }
    }
}

fn compare_by(order: SortOrder, lhs: f64, rhs: f64) -> Ordering {
    match order {
        SortOrder::Asc => lhs.total_cmp(&rhs),
        SortOrder::Desc => rhs.total_cmp(&lhs),
        SortOrder::None => Ordering::Equal,
    }
}

pub fn derive_view(rows: &[InstrumentRow], filter: FilterMode, sort: SortState) -> Vec<InstrumentRow> {
    let mut derived: Vec<InstrumentRow> = rows
        .iter()
        .filter(|row| filter.accepts(row))
        .cloned()
        .collect();

    if sort.hourly.is_active() {
        derived.sort_by(|lhs, rhs| {
            compare_by(
                sort.hourly,
                lhs.price_change_percent_1h,
                rhs.price_change_percent_1h,
            )
        });
    } else if sort.daily.is_active() {
        derived.sort_by(|lhs, rhs| {
            compare_by(
                sort.daily,
                lhs.price_change_percent_24h,
                rhs.price_change_percent_24h,
            )
        });
    }

    derived
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewControls {
    pub filter: FilterMode,
    pub sort: SortState,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivedView {
    pub rows: Vec<InstrumentRow>,
    pub filter: FilterMode,
    pub sort: SortState,
    pub store_version: u64,
}

impl DerivedView {
    fn compute(store: &QuoteStoreHandle, controls: ViewControls) -> Self {
        let store_version = store.version();
        let rows = derive_view(&store.snapshot(), controls.filter, controls.sort);
        Self {
            rows,
            filter: controls.filter,
            sort: controls.sort,
            store_version,
        }
    }
}

/// Observer between the quote store and the presentation layer: recomputes the
/// derived view whenever the store or the view controls change.
#[derive(Debug, Clone)]
pub struct ViewPipeline {
    store: QuoteStoreHandle,
    controls: Arc<watch::Sender<ViewControls>>,
    output: Arc<watch::Sender<Arc<DerivedView>>>,
}

impl ViewPipeline {
    pub fn new(store: QuoteStoreHandle) -> Self {
        let initial = DerivedView::compute(&store, ViewControls::default());
        let (controls, _) = watch::channel(ViewControls::default());
        let (output, _) = watch::channel(Arc::new(initial));
        Self {
            store,
            controls: Arc::new(controls),
            output: Arc::new(output),
        }
    }

    pub fn controls(&self) -> ViewControls {
        *self.controls.borrow()
    }

    pub fn set_filter(&self, filter: FilterMode) {
        self.controls.send_if_modified(|controls| {
            let changed = controls.filter != filter;
            controls.filter = filter;
            changed
        });
    }

    pub fn toggle_hourly_sort(&self) -> SortState {
        self.update_sort(SortState::toggle_hourly)
    }

    pub fn toggle_daily_sort(&self) -> SortState {
        self.update_sort(SortState::toggle_daily)
    }

    fn update_sort(&self, toggle: fn(&mut SortState)) -> SortState {
        let mut next = SortState::default();
        self.controls.send_modify(|controls| {
            toggle(&mut controls.sort);
            next = controls.sort;
        });
        next
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DerivedView>> {
        self.output.subscribe()
    }

    pub fn current(&self) -> Arc<DerivedView> {
        Arc::clone(&self.output.borrow())
    }

    /// Recomputes synchronously and publishes the result.
    pub fn refresh(&self) -> Arc<DerivedView> {
        let view = Arc::new(DerivedView::compute(&self.store, self.controls()));
        self.output.send_replace(Arc::clone(&view));
        view
    }

    pub async fn run(self, cancel_token: CancellationToken) {
        let mut store_changes = self.store.subscribe();
        let mut control_changes = self.controls.subscribe();
        self.refresh();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                changed = store_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = control_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            store_changes.borrow_and_update();
            control_changes.borrow_and_update();
            let view = self.refresh();
            debug!(
                rows = view.rows.len(),
                store_version = view.store_version,
                "derived view recomputed"
            );
        }
    }
}

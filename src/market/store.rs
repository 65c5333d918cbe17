use crate::market::types::{InstrumentRow, RowPatch};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Rows in snapshot rank order, keyed by symbol.
#[derive(Debug, Default)]
pub struct QuoteStore {
    rows: Vec<InstrumentRow>,
    index: HashMap<String, usize>,
}

impl QuoteStore {
    /// Replaces the whole contents. Duplicate symbols keep their first
    /// (highest-ranked) occurrence.
    pub fn load(&mut self, rows: Vec<InstrumentRow>) {
        self.rows.clear();
        self.index.clear();
        for row in rows {
            if self.index.contains_key(&row.symbol) {
                continue;
            }
            self.index.insert(row.symbol.clone(), self.rows.len());
            self.rows.push(row);
        }
    }

    /// No-op for symbols outside the loaded universe. Returns whether a row
    /// was updated.
    pub fn merge(&mut self, symbol: &str, patch: &RowPatch) -> bool {
        let Some(&position) = self.index.get(symbol) else {
            return false;
        };
        match self.rows.get_mut(position) {
            Some(row) => {
                row.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentRow> {
        self.index
            .get(symbol)
            .and_then(|&position| self.rows.get(position))
    }

    pub fn rows(&self) -> &[InstrumentRow] {
        &self.rows
    }

    pub fn symbols(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.symbol.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Shared store for one mounted view. Every effective `load`/`merge` bumps the
/// version published on the change channel.
#[derive(Debug, Clone)]
pub struct QuoteStoreHandle {
    store: Arc<Mutex<QuoteStore>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for QuoteStoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteStoreHandle {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0_u64);
        Self {
            store: Arc::new(Mutex::new(QuoteStore::default())),
            changes: Arc::new(changes),
        }
    }

    pub fn load(&self, rows: Vec<InstrumentRow>) {
        self.store.lock().load(rows);
        self.notify();
    }

    pub fn merge(&self, symbol: &str, patch: &RowPatch) -> bool {
        let merged = self.store.lock().merge(symbol, patch);
        if merged {
            self.notify();
        }
        merged
    }

    pub fn snapshot(&self) -> Vec<InstrumentRow> {
        self.store.lock().rows().to_vec()
    }

    pub fn get(&self, symbol: &str) -> Option<InstrumentRow> {
        self.store.lock().get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.store.lock().symbols()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes
            .send_modify(|version| *version = version.wrapping_add(1));
    }
}

// ===============================
// src/deficit.rs
// ===============================
use ahash::AHashMap as HashMap;
use tracing::debug;

use crate::domain::{BoostedDemand, Deficit, InventoryRecord};
use crate::metrics::DEFICITS;

/// Inventory pre-indexed two ways:
/// - (store, product) -> stock, first row wins on duplicates
/// - product -> records in input order (candidate search for sourcing)
#[derive(Debug, Default)]
pub struct InventoryIndex {
    stock: HashMap<(String, String), u64>,
    by_product: HashMap<String, Vec<InventoryRecord>>,
}

impl InventoryIndex {
    pub fn new(records: &[InventoryRecord]) -> Self {
        let mut idx = InventoryIndex::default();
        for r in records {
            idx.stock
                .entry((r.store.clone(), r.product.clone()))
                .or_insert(r.current_stock);
            idx.by_product.entry(r.product.clone()).or_default().push(r.clone());
        }
        idx
    }

    pub fn stock_of(&self, store: &str, product: &str) -> Option<u64> {
        self.stock.get(&(store.to_string(), product.to_string())).copied()
    }

    pub fn holders_of(&self, product: &str) -> &[InventoryRecord] {
        self.by_product.get(product).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Stock below boosted demand -> deficit of the difference. Unknown stock counts as 0.
pub fn resolve(boosted: &[BoostedDemand], inventory: &InventoryIndex) -> Vec<Deficit> {
    let mut out = Vec::new();
    for b in boosted {
        let stock = inventory.stock_of(&b.store, &b.product).unwrap_or(0);
        if stock >= b.quantity {
            continue;
        }
        let d = Deficit { store: b.store.clone(), product: b.product.clone(), quantity: b.quantity - stock };
        debug!(store = %d.store, product = %d.product, stock, demand = b.quantity, qty = d.quantity, "deficit");
        DEFICITS.inc();
        out.push(d);
    }
    out
}

use crate::api::PriceOracle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory oracle whose prices are set by the test
#[derive(Default)]
pub struct ScriptedOracle {
    prices: Mutex<HashMap<String, f64>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, asset_id: &str, price: f64) {
        self.prices.lock().unwrap().insert(asset_id.to_string(), price);
    }

    pub fn clear_price(&self, asset_id: &str) {
        self.prices.lock().unwrap().remove(asset_id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PriceOracle for ScriptedOracle {
    async fn quote(&self, asset_ids: &[String]) -> HashMap<String, f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let prices = self.prices.lock().unwrap();
        asset_ids
            .iter()
            .filter_map(|id| prices.get(id).map(|p| (id.clone(), *p)))
            .collect()
    }
}

pub mod jupiter;

pub use jupiter::{JupiterPriceClient, OracleError, SOL_MINT};

use std::collections::HashMap;
use std::future::Future;

/// Source of base-asset-denominated quotes
///
/// Assets the oracle could not price this round are simply absent from the
/// returned map. Callers treat absence as "try again later", never as zero.
pub trait PriceOracle: Send + Sync {
    fn quote(&self, asset_ids: &[String]) -> impl Future<Output = HashMap<String, f64>> + Send;

    fn quote_one(&self, asset_id: &str) -> impl Future<Output = Option<f64>> + Send {
        let ids = vec![asset_id.to_string()];
        async move { self.quote(&ids).await.get(&ids[0]).copied() }
    }
}

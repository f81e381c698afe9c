use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};

use super::engine::{Engine, QuoteOutcome};
use crate::api::PriceOracle;
use crate::models::SellFill;

/// Outcome of one monitoring tick
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub sold: Vec<SellFill>,
    pub near_target: Vec<String>,
    pub deferred: Vec<String>, // No quote this round
    pub failed: Vec<String>,
}

impl TickReport {
    pub fn sold_ids(&self) -> Vec<&str> {
        self.sold.iter().map(|f| f.asset_id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sold.is_empty()
            && self.near_target.is_empty()
            && self.deferred.is_empty()
            && self.failed.is_empty()
    }
}

/// Shared-timer price monitor for every open position
///
/// One batched quote request per tick covers all open assets. When nothing
/// is open the loop parks until the engine reports a new position.
pub struct PositionMonitor<O> {
    engine: Arc<Engine<O>>,
    period: Duration,
}

impl<O: PriceOracle> PositionMonitor<O> {
    pub fn new(engine: Arc<Engine<O>>, period: Duration) -> Self {
        Self { engine, period }
    }

    /// Run until the task is dropped or aborted
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.engine.open_asset_ids().await.is_empty() {
                tracing::debug!("[MONITOR] No open positions, waiting");
                self.engine.wait_for_open().await;
                ticker.reset();
            }

            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Quote every open asset once and apply the exit rule
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let asset_ids = self.engine.open_asset_ids().await;
        if asset_ids.is_empty() {
            return report;
        }

        tracing::debug!(
            "[MONITOR] Tick at {} for {} positions",
            Utc::now().format("%H:%M:%S"),
            asset_ids.len()
        );

        let quotes = self.engine.oracle().quote(&asset_ids).await;

        for asset_id in asset_ids {
            let Some(&price) = quotes.get(&asset_id) else {
                tracing::debug!(asset = %asset_id, "[MONITOR] No quote for {}, retrying next tick", asset_id);
                report.deferred.push(asset_id);
                continue;
            };

            match self.engine.apply_quote(&asset_id, price).await {
                Ok(QuoteOutcome::Sold(fill)) => report.sold.push(fill),
                Ok(QuoteOutcome::NearTarget { .. }) => report.near_target.push(asset_id),
                Ok(QuoteOutcome::Held) | Ok(QuoteOutcome::Gone) => {}
                Err(e) => {
                    tracing::error!(asset = %asset_id, "[MONITOR] {} evaluation failed: {}", asset_id, e);
                    report.failed.push(asset_id);
                }
            }
        }

        report
    }
}

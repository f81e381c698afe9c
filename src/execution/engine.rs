use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use super::exit_rule::{ExitSignal, FeeSchedule, TakeProfitRule};
use super::monitor::PositionMonitor;
use super::position_store::PositionStore;
use super::recovery::replay;
use crate::api::PriceOracle;
use crate::models::{is_valid_asset_id, BuyFill, LedgerEntry, Position, SellFill, TradeSide};
use crate::persistence::{Ledger, LedgerError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("ledger write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Sizing, fees and exit parameters of the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_balance: f64,
    pub buy_size: f64,
    pub fees: FeeSchedule,
    pub take_profit: TakeProfitRule,
    pub restore_balance: bool, // Seed balance from the ledger's last row on recovery
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 2.0,
            buy_size: 0.02,
            fees: FeeSchedule::default(),
            take_profit: TakeProfitRule::default(),
            restore_balance: false,
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// Why `open_position` did or did not open a position
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(BuyFill),
    AlreadyOpen,
    NoQuote,
    InsufficientBalance { balance: f64, required: f64 },
    InvalidAssetId,
}

/// What a single quote did to an open position
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteOutcome {
    Sold(SellFill),
    NearTarget { target_price: f64 },
    Held,
    /// Position was closed before the quote could be applied
    Gone,
}

#[derive(Debug)]
struct EngineState {
    balance: f64,
    positions: PositionStore,
    recovered: bool,
}

/// Owns the balance, the open positions and the ledger
///
/// All mutations happen under one async lock together with the matching
/// ledger append, so a BUY or SELL is either fully committed (row on disk,
/// balance and store updated) or not at all. The lock is never held across
/// an oracle call.
pub struct Engine<O> {
    oracle: O,
    ledger: Ledger,
    config: EngineConfig,
    state: Mutex<EngineState>,
    opened: Notify,
}

impl<O: PriceOracle> Engine<O> {
    pub fn new(oracle: O, ledger: Ledger, config: EngineConfig) -> Self {
        let state = EngineState {
            balance: config.initial_balance,
            positions: PositionStore::new(),
            recovered: false,
        };

        Self {
            oracle,
            ledger,
            config,
            state: Mutex::new(state),
            opened: Notify::new(),
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    pub async fn position(&self, asset_id: &str) -> Option<Position> {
        self.state.lock().await.positions.get(asset_id).cloned()
    }

    /// Open positions ordered by asset id
    pub async fn open_positions(&self) -> Vec<Position> {
        let state = self.state.lock().await;
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        positions
    }

    pub async fn open_asset_ids(&self) -> Vec<String> {
        self.state.lock().await.positions.keys()
    }

    /// Resolves once a position has been opened since the last wait
    pub async fn wait_for_open(&self) {
        self.opened.notified().await
    }

    /// Replay the ledger into the position store
    ///
    /// Assets already tracked in memory are left as they are. Returns the
    /// number of positions resumed from the ledger.
    pub async fn rebuild_from_ledger(&self) -> Result<usize, EngineError> {
        let mut state = self.state.lock().await;
        self.rebuild_locked(&mut state)
    }

    fn rebuild_locked(&self, state: &mut EngineState) -> Result<usize, EngineError> {
        let replayed = replay(self.ledger.read_all()?);

        let mut resumed = 0;
        let mut survivors: Vec<Position> = replayed.open.into_values().collect();
        survivors.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));

        for position in survivors {
            if state.positions.contains(&position.asset_id) {
                continue;
            }
            tracing::info!(asset = %position.asset_id, "🔄 Resuming monitoring for {}", position.asset_id);
            state.positions.set(position);
            resumed += 1;
        }

        if self.config.restore_balance {
            if let Some(balance) = replayed.last_balance {
                tracing::info!("Restored balance {:.4} from ledger", balance);
                state.balance = balance;
            }
        }

        state.recovered = true;
        tracing::info!(
            "Replayed {} ledger rows, {} open positions",
            replayed.rows,
            state.positions.len()
        );

        if resumed > 0 {
            self.opened.notify_one();
        }

        Ok(resumed)
    }

    async fn ensure_recovered(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if !state.recovered {
            self.rebuild_locked(&mut state)?;
        }
        Ok(())
    }

    /// Open a position in `asset_id` at the current quote
    ///
    /// Safe to call repeatedly: an asset that is already open is reported as
    /// `AlreadyOpen` and nothing changes. Only a ledger write failure is an
    /// error; every other refusal is an `OpenOutcome`.
    pub async fn open_position(&self, asset_id: &str) -> Result<OpenOutcome, EngineError> {
        let asset_id = asset_id.trim();
        if !is_valid_asset_id(asset_id) {
            tracing::warn!("[OPEN] Rejected asset id {:?}", asset_id);
            return Ok(OpenOutcome::InvalidAssetId);
        }

        self.ledger.initialize()?;
        self.ensure_recovered().await?;

        if self.state.lock().await.positions.contains(asset_id) {
            tracing::info!(asset = %asset_id, "[OPEN] Already monitoring {}", asset_id);
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let Some(entry_price) = self.oracle.quote_one(asset_id).await else {
            tracing::info!(asset = %asset_id, "[OPEN] Price unavailable for {}", asset_id);
            return Ok(OpenOutcome::NoQuote);
        };

        let mut state = self.state.lock().await;

        // Another open for the same asset may have committed while we were quoting
        if state.positions.contains(asset_id) {
            tracing::info!(asset = %asset_id, "[OPEN] Already monitoring {}", asset_id);
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let buy_size = self.config.buy_size;
        if state.balance < buy_size {
            tracing::info!(
                asset = %asset_id,
                "[OPEN] Not enough balance to buy {} ({:.4} < {:.4})",
                asset_id,
                state.balance,
                buy_size
            );
            return Ok(OpenOutcome::InsufficientBalance {
                balance: state.balance,
                required: buy_size,
            });
        }

        let token_amount = self.config.fees.apply_pct(buy_size) / entry_price;
        let cost = buy_size + self.config.fees.fixed;
        let balance_after = state.balance - cost;

        let entry = LedgerEntry {
            timestamp: self.ledger.now(),
            asset_id: asset_id.to_string(),
            side: TradeSide::Buy,
            base_amount: buy_size,
            token_amount,
            unit_price: entry_price,
            balance_after,
        };

        if let Err(e) = self.record(entry).await {
            tracing::error!(asset = %asset_id, "✗ BUY {} not recorded, position not opened: {}", asset_id, e);
            return Err(e);
        }

        state.balance = balance_after;
        state
            .positions
            .set(Position::new(asset_id, entry_price, token_amount));
        drop(state);

        tracing::info!(
            asset = %asset_id,
            "✓ Bought {:.4} {} @ {:.9}. Balance: {:.4}",
            token_amount,
            asset_id,
            entry_price,
            balance_after
        );
        self.opened.notify_one();

        Ok(OpenOutcome::Opened(BuyFill {
            asset_id: asset_id.to_string(),
            entry_price,
            token_amount,
            cost,
            balance_after,
        }))
    }

    /// Apply a fresh quote to an open position, selling it if the target is hit
    ///
    /// Presence and the exit rule are checked under the same lock that guards
    /// the SELL commit, so two racing ticks cannot both sell one position.
    pub async fn apply_quote(
        &self,
        asset_id: &str,
        current_price: f64,
    ) -> Result<QuoteOutcome, EngineError> {
        let mut state = self.state.lock().await;

        let Some(position) = state.positions.get(asset_id).cloned() else {
            return Ok(QuoteOutcome::Gone);
        };

        match self.config.take_profit.evaluate(&position, current_price) {
            ExitSignal::TakeProfit { .. } => {
                let fill = self
                    .commit_sell(&mut state, &position, current_price)
                    .await?;
                Ok(QuoteOutcome::Sold(fill))
            }
            ExitSignal::NearTarget { target_price } => {
                tracing::info!(
                    asset = %asset_id,
                    "📈 {} nearing target: {:.9} / {:.9}",
                    asset_id,
                    current_price,
                    target_price
                );
                if let Some(p) = state.positions.get_mut(asset_id) {
                    p.near_target_notified = true;
                }
                Ok(QuoteOutcome::NearTarget { target_price })
            }
            ExitSignal::Hold => Ok(QuoteOutcome::Held),
        }
    }

    /// Append on the blocking pool; callers hold the state lock throughout
    async fn record(&self, entry: LedgerEntry) -> Result<(), EngineError> {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || ledger.append(&entry)).await??;
        Ok(())
    }

    async fn commit_sell(
        &self,
        state: &mut EngineState,
        position: &Position,
        exit_price: f64,
    ) -> Result<SellFill, EngineError> {
        let fees = self.config.fees;
        let gross = position.token_amount * exit_price;
        let proceeds = fees.apply_pct(gross);
        let balance_after = state.balance + proceeds - fees.fixed;

        let entry = LedgerEntry {
            timestamp: self.ledger.now(),
            asset_id: position.asset_id.clone(),
            side: TradeSide::Sell,
            base_amount: proceeds,
            token_amount: position.token_amount,
            unit_price: exit_price,
            balance_after,
        };

        if let Err(e) = self.record(entry).await {
            tracing::error!(
                asset = %position.asset_id,
                "✗ SELL {} not recorded, position kept open: {}",
                position.asset_id,
                e
            );
            return Err(e);
        }

        state.balance = balance_after;
        state.positions.delete(&position.asset_id);

        tracing::info!(
            asset = %position.asset_id,
            "✅ Sold {} at {}. Balance: {:.4}",
            position.asset_id,
            exit_price,
            balance_after
        );

        Ok(SellFill {
            asset_id: position.asset_id.clone(),
            exit_price,
            token_amount: position.token_amount,
            gross,
            proceeds,
            balance_after,
        })
    }
}

impl<O: PriceOracle + 'static> Engine<O> {
    /// Initialize the ledger, recover open positions and spawn the monitor
    pub async fn start_monitoring(self: &Arc<Self>) -> Result<JoinHandle<()>, EngineError> {
        self.ledger.initialize()?;
        self.ensure_recovered().await?;

        tracing::info!(
            "🚀 Starting batch price monitor (every {:?})",
            self.config.poll_interval
        );

        let monitor = PositionMonitor::new(Arc::clone(self), self.config.poll_interval);
        Ok(tokio::spawn(monitor.run()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::ScriptedOracle;
    use tempfile::TempDir;

    fn engine_with(oracle: ScriptedOracle) -> (TempDir, Engine<ScriptedOracle>) {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("trades.csv"), chrono_tz::Asia::Jakarta);
        (dir, Engine::new(oracle, ledger, EngineConfig::default()))
    }

    fn ledger_rows(engine: &Engine<ScriptedOracle>) -> Vec<LedgerEntry> {
        engine.ledger().read_all().unwrap().collect()
    }

    #[tokio::test]
    async fn test_open_position_debits_balance() {
        let oracle = ScriptedOracle::new();
        oracle.set_price("T1", 0.001);
        let (_dir, engine) = engine_with(oracle);

        let outcome = engine.open_position("T1").await.unwrap();

        let OpenOutcome::Opened(fill) = outcome else {
            panic!("expected a fill, got {:?}", outcome);
        };
        assert!((fill.token_amount - 19.8).abs() < 1e-9);
        assert!((fill.balance_after - 1.9793).abs() < 1e-12);
        assert!((engine.balance().await - 1.9793).abs() < 1e-12);

        let rows = ledger_rows(&engine);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].side, TradeSide::Buy);
        assert_eq!(rows[0].base_amount, 0.02);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let oracle = ScriptedOracle::new();
        oracle.set_price("T1", 0.001);
        let (_dir, engine) = engine_with(oracle);

        engine.open_position("T1").await.unwrap();
        let second = engine.open_position("T1").await.unwrap();

        assert_eq!(second, OpenOutcome::AlreadyOpen);
        assert_eq!(ledger_rows(&engine).len(), 1);
        assert_eq!(engine.open_positions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_quote_changes_nothing() {
        let (_dir, engine) = engine_with(ScriptedOracle::new());

        let outcome = engine.open_position("T1").await.unwrap();

        assert_eq!(outcome, OpenOutcome::NoQuote);
        assert_eq!(engine.balance().await, 2.0);
        assert!(ledger_rows(&engine).is_empty());
        assert!(engine.open_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let oracle = ScriptedOracle::new();
        oracle.set_price("T1", 0.001);
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("trades.csv"), chrono_tz::UTC);
        let config = EngineConfig {
            initial_balance: 0.01,
            ..EngineConfig::default()
        };
        let engine = Engine::new(oracle, ledger, config);

        let outcome = engine.open_position("T1").await.unwrap();

        assert_eq!(
            outcome,
            OpenOutcome::InsufficientBalance {
                balance: 0.01,
                required: 0.02
            }
        );
        assert!(ledger_rows(&engine).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_asset_id_rejected() {
        let (_dir, engine) = engine_with(ScriptedOracle::new());

        assert_eq!(
            engine.open_position("A,B").await.unwrap(),
            OpenOutcome::InvalidAssetId
        );
        assert_eq!(
            engine.open_position("   ").await.unwrap(),
            OpenOutcome::InvalidAssetId
        );
    }

    #[tokio::test]
    async fn test_ledger_failure_leaves_state_untouched() {
        let oracle = ScriptedOracle::new();
        oracle.set_price("T1", 0.001);
        let dir = TempDir::new().unwrap();
        // Ledger path is a directory, so every write fails
        let ledger = Ledger::new(dir.path(), chrono_tz::UTC);
        let engine = Engine::new(oracle, ledger, EngineConfig::default());

        let result = engine.open_position("T1").await;

        assert!(matches!(result, Err(EngineError::Ledger(_))));
        assert_eq!(engine.balance().await, 2.0);
        assert!(engine.open_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_quote_sells_at_target() {
        let oracle = ScriptedOracle::new();
        oracle.set_price("T1", 0.001);
        let (_dir, engine) = engine_with(oracle);
        engine.open_position("T1").await.unwrap();

        let outcome = engine.apply_quote("T1", 0.002).await.unwrap();

        let QuoteOutcome::Sold(fill) = outcome else {
            panic!("expected a sell, got {:?}", outcome);
        };
        let expected = 1.9793 + 19.8 * 0.002 * 0.99 - 0.0007;
        assert!((fill.balance_after - expected).abs() < 1e-9);
        assert!(engine.position("T1").await.is_none());
        assert_eq!(ledger_rows(&engine).len(), 2);
    }

    #[tokio::test]
    async fn test_apply_quote_near_target_marks_once() {
        let oracle = ScriptedOracle::new();
        oracle.set_price("T1", 0.001);
        let (_dir, engine) = engine_with(oracle);
        engine.open_position("T1").await.unwrap();

        let first = engine.apply_quote("T1", 0.0019).await.unwrap();
        let second = engine.apply_quote("T1", 0.0019).await.unwrap();

        assert!(matches!(first, QuoteOutcome::NearTarget { .. }));
        assert_eq!(second, QuoteOutcome::Held);
        assert!(engine.position("T1").await.unwrap().near_target_notified);
    }

    #[tokio::test]
    async fn test_apply_quote_for_closed_asset_is_gone() {
        let (_dir, engine) = engine_with(ScriptedOracle::new());
        assert_eq!(
            engine.apply_quote("T1", 1.0).await.unwrap(),
            QuoteOutcome::Gone
        );
    }

    #[tokio::test]
    async fn test_first_open_recovers_from_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.csv");
        std::fs::write(
            &path,
            "Timestamp,CA,Type,Amount (SOL),Amount (Token),Price,Remaining Balance (SOL)\n\
             2025-07-14 09:30:05,OLD,BUY,0.02,19.8,0.001000000,1.9793\n\n",
        )
        .unwrap();

        let oracle = ScriptedOracle::new();
        oracle.set_price("OLD", 0.001);
        let engine = Engine::new(
            oracle,
            Ledger::new(&path, chrono_tz::UTC),
            EngineConfig::default(),
        );

        let outcome = engine.open_position("OLD").await.unwrap();

        assert_eq!(outcome, OpenOutcome::AlreadyOpen);
        assert_eq!(engine.balance().await, 2.0);
    }

    #[tokio::test]
    async fn test_restore_balance_from_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.csv");
        std::fs::write(
            &path,
            "Timestamp,CA,Type,Amount (SOL),Amount (Token),Price,Remaining Balance (SOL)\n\
             2025-07-14 09:30:05,A,BUY,0.02,19.8,0.001000000,1.9793\n\
             2025-07-14 09:31:05,A,SELL,0.0411642,19.8,0.0021,2.0198\n",
        )
        .unwrap();

        let config = EngineConfig {
            restore_balance: true,
            ..EngineConfig::default()
        };
        let engine = Engine::new(ScriptedOracle::new(), Ledger::new(&path, chrono_tz::UTC), config);

        let resumed = engine.rebuild_from_ledger().await.unwrap();

        assert_eq!(resumed, 0);
        assert_eq!(engine.balance().await, 2.0198);
    }

    #[tokio::test]
    async fn test_zero_price_buy_is_not_resumed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.csv");
        std::fs::write(
            &path,
            "Timestamp,CA,Type,Amount (SOL),Amount (Token),Price,Remaining Balance (SOL)\n\
             2025-07-14 09:30:05,TINY,BUY,0.02,60000000000,0.000000000,1.9793\n\
             2025-07-14 09:30:06,OK,BUY,0.02,19.8,0.001000000,1.9586\n",
        )
        .unwrap();

        let engine = Engine::new(
            ScriptedOracle::new(),
            Ledger::new(&path, chrono_tz::UTC),
            EngineConfig::default(),
        );

        let resumed = engine.rebuild_from_ledger().await.unwrap();

        assert_eq!(resumed, 1);
        assert!(engine.position("TINY").await.is_none());
        assert_eq!(
            engine.apply_quote("TINY", 3e-10).await.unwrap(),
            QuoteOutcome::Gone
        );
        assert!(ledger_rows(&engine)
            .iter()
            .all(|row| row.side == TradeSide::Buy));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_opens_on_worker_pool() {
        let oracle = ScriptedOracle::new();
        let ids: Vec<String> = (0..8).map(|i| format!("T{}", i)).collect();
        for id in &ids {
            oracle.set_price(id, 0.001);
        }
        let (_dir, engine) = engine_with(oracle);
        let engine = Arc::new(engine);

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                let id = id.clone();
                tokio::spawn(async move { engine.open_position(&id).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap().unwrap(),
                OpenOutcome::Opened(_)
            ));
        }

        let rows = ledger_rows(&engine);
        assert_eq!(rows.len(), 8);
        let expected = 2.0 - 8.0 * 0.0207;
        assert!((engine.balance().await - expected).abs() < 1e-9);
        assert!((rows[7].balance_after - 1.8344).abs() < 1e-9);
    }
}

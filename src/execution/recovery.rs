use crate::models::{LedgerEntry, Position, TradeSide};
use std::collections::HashMap;

/// What a full pass over the ledger leaves behind
#[derive(Debug, Default, Clone)]
pub struct ReplayState {
    pub open: HashMap<String, Position>,
    pub last_balance: Option<f64>,
    pub rows: usize,
}

/// Fold ledger rows, in file order, into the set of still-open positions
///
/// A BUY sets (or replaces) the asset's position, a SELL clears it. Row
/// timestamps are ignored on purpose: the wall clock is not monotonic.
pub fn replay<I>(entries: I) -> ReplayState
where
    I: IntoIterator<Item = LedgerEntry>,
{
    let mut state = ReplayState::default();

    for entry in entries {
        state.rows += 1;
        state.last_balance = Some(entry.balance_after);

        match entry.side {
            TradeSide::Buy => {
                let position =
                    Position::new(entry.asset_id.clone(), entry.unit_price, entry.token_amount);
                state.open.insert(entry.asset_id, position);
            }
            TradeSide::Sell => {
                state.open.remove(&entry.asset_id);
            }
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(asset: &str, side: TradeSide, price: f64, second: u32) -> LedgerEntry {
        LedgerEntry {
            timestamp: NaiveDate::from_ymd_opt(2025, 7, 14)
                .unwrap()
                .and_hms_opt(10, 0, second)
                .unwrap(),
            asset_id: asset.to_string(),
            side,
            base_amount: 0.02,
            token_amount: 10.0,
            unit_price: price,
            balance_after: 2.0 - second as f64 * 0.01,
        }
    }

    #[test]
    fn test_last_event_wins_per_asset() {
        let rows = vec![
            row("A", TradeSide::Buy, 1.0, 1),
            row("B", TradeSide::Buy, 2.0, 2),
            row("A", TradeSide::Sell, 2.0, 3),
            row("C", TradeSide::Buy, 3.0, 4),
            row("B", TradeSide::Sell, 4.0, 5),
            row("A", TradeSide::Buy, 1.5, 6),
        ];

        let state = replay(rows);

        let mut open: Vec<_> = state.open.keys().cloned().collect();
        open.sort();
        assert_eq!(open, vec!["A", "C"]);
        assert_eq!(state.open["A"].entry_price, 1.5);
        assert_eq!(state.rows, 6);
    }

    #[test]
    fn test_file_order_not_timestamp_order() {
        // Clock went backwards between the BUY and the SELL
        let rows = vec![
            row("A", TradeSide::Buy, 1.0, 50),
            row("A", TradeSide::Sell, 2.0, 10),
        ];

        let state = replay(rows);
        assert!(state.open.is_empty());
    }

    #[test]
    fn test_repeated_buy_overwrites() {
        let rows = vec![
            row("A", TradeSide::Buy, 1.0, 1),
            row("A", TradeSide::Buy, 3.0, 2),
        ];

        let state = replay(rows);
        assert_eq!(state.open.len(), 1);
        assert_eq!(state.open["A"].entry_price, 3.0);
    }

    #[test]
    fn test_tracks_last_balance() {
        let rows = vec![
            row("A", TradeSide::Buy, 1.0, 1),
            row("A", TradeSide::Sell, 2.0, 7),
        ];

        let state = replay(rows);
        assert!((state.last_balance.unwrap() - 1.93).abs() < 1e-12);
    }

    #[test]
    fn test_empty_ledger() {
        let state = replay(Vec::new());
        assert!(state.open.is_empty());
        assert_eq!(state.last_balance, None);
        assert_eq!(state.rows, 0);
    }

    #[test]
    fn test_recovered_positions_are_unnotified() {
        let state = replay(vec![row("A", TradeSide::Buy, 1.0, 1)]);
        assert!(!state.open["A"].near_target_notified);
    }
}

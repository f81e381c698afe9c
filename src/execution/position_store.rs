use crate::models::Position;
use std::collections::HashMap;

/// In-memory open positions keyed by asset id
///
/// Only a cache of the ledger: rebuilt on recovery, then updated by the
/// engine as BUY/SELL rows are committed.
#[derive(Debug, Default, Clone)]
pub struct PositionStore {
    positions: HashMap<String, Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset_id: &str) -> Option<&Position> {
        self.positions.get(asset_id)
    }

    pub fn get_mut(&mut self, asset_id: &str) -> Option<&mut Position> {
        self.positions.get_mut(asset_id)
    }

    /// Insert or replace the position for its asset
    pub fn set(&mut self, position: Position) -> Option<Position> {
        self.positions.insert(position.asset_id.clone(), position)
    }

    pub fn delete(&mut self, asset_id: &str) -> Option<Position> {
        self.positions.remove(asset_id)
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.positions.contains_key(asset_id)
    }

    /// Asset ids in sorted order, so ticks and logs are deterministic
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.positions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn values(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }
}

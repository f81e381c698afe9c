use crate::models::Position;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub pct: f64,   // Proportional fee on every fill
    pub fixed: f64, // Flat network fee in base units
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            pct: 0.01,
            fixed: 0.0007,
        }
    }
}

impl FeeSchedule {
    pub fn apply_pct(&self, amount: f64) -> f64 {
        amount * (1.0 - self.pct)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitSignal {
    TakeProfit { target_price: f64 },
    NearTarget { target_price: f64 },
    Hold,
}

/// Take-profit exit rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeProfitRule {
    pub multiplier: f64,
    pub near_target_ratio: f64,
}

impl Default for TakeProfitRule {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            near_target_ratio: 0.9,
        }
    }
}

impl TakeProfitRule {
    pub fn target_price(&self, position: &Position) -> f64 {
        position.entry_price * self.multiplier
    }

    /// Decide what a quote means for a position
    ///
    /// The target is inclusive. `NearTarget` fires only while the position has
    /// not been notified yet.
    pub fn evaluate(&self, position: &Position, current_price: f64) -> ExitSignal {
        let target_price = self.target_price(position);

        if current_price >= target_price {
            ExitSignal::TakeProfit { target_price }
        } else if !position.near_target_notified
            && current_price >= target_price * self.near_target_ratio
        {
            ExitSignal::NearTarget { target_price }
        } else {
            ExitSignal::Hold
        }
    }
}

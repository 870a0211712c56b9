use crate::domain::types::PositionSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Open exposure for one (model, coin, side). Exists iff quantity > 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub model_id: i64,
    pub coin: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub opened_at: i64,
}

impl Position {
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.avg_entry_price
    }

    /// Unrealized P&L against a current price.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (current_price - self.avg_entry_price) * self.quantity,
            PositionSide::Short => (self.avg_entry_price - current_price) * self.quantity,
        }
    }
}

/// Point-in-time view of a model's cash and open positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub model_id: i64,
    pub cash: Decimal,
    pub positions: Vec<Position>,
}

impl PortfolioSnapshot {
    /// Cash plus positions valued at current prices. Positions without a
    /// quoted price are valued at their average entry (conservative).
    pub fn total_value(&self, current_prices: &HashMap<String, Decimal>) -> Decimal {
        let mut value = self.cash;
        for position in &self.positions {
            let price = current_prices
                .get(&position.coin)
                .copied()
                .unwrap_or(position.avg_entry_price);
            value += position.quantity * price;
        }
        value
    }

    pub fn position(&self, coin: &str, side: PositionSide) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.coin == coin && p.side == side)
    }

    /// Any open position on a coin, regardless of side.
    pub fn any_position(&self, coin: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.coin == coin)
    }

    pub fn open_positions(&self) -> usize {
        self.positions.len()
    }
}

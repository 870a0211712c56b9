use crate::domain::types::TradeSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable trade log entry. `realized_pnl` is zero for opens and net of the
/// close fee for closes; `exchange_order_id` is present only for live fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub model_id: i64,
    pub coin: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub timestamp: i64,
    pub exchange_order_id: Option<String>,
}

impl Trade {
    pub fn is_close(&self) -> bool {
        self.side == TradeSide::Close
    }

    pub fn is_win(&self) -> bool {
        self.is_close() && self.realized_pnl > Decimal::ZERO
    }

    pub fn is_loss(&self) -> bool {
        self.is_close() && self.realized_pnl < Decimal::ZERO
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Count of consecutive losing closes at the tail of a trade history.
/// `trades` must be ordered most-recent-first; opens are ignored.
pub fn consecutive_losses(trades: &[Trade]) -> i64 {
    let mut count = 0;
    for trade in trades.iter().filter(|t| t.is_close()) {
        if trade.realized_pnl < Decimal::ZERO {
            count += 1;
        } else {
            break;
        }
    }
    count
}

/// Win rate in percent over the `n` most recent closes, or `None` when fewer
/// than `n` closes exist. `trades` must be ordered most-recent-first.
pub fn win_rate_last(trades: &[Trade], n: usize) -> Option<Decimal> {
    let closes: Vec<&Trade> = trades.iter().filter(|t| t.is_close()).take(n).collect();
    if closes.len() < n {
        return None;
    }
    let wins = closes.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count();
    Some(Decimal::from(wins as i64) * Decimal::from(100) / Decimal::from(n as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn close(pnl: Decimal) -> Trade {
        Trade {
            id: 0,
            model_id: 1,
            coin: "BTC".to_string(),
            side: TradeSide::Close,
            quantity: dec!(0.01),
            price: dec!(40000),
            fee: dec!(0.4),
            realized_pnl: pnl,
            timestamp: 0,
            exchange_order_id: None,
        }
    }

    fn open() -> Trade {
        Trade {
            side: TradeSide::Buy,
            realized_pnl: Decimal::ZERO,
            ..close(Decimal::ZERO)
        }
    }

    #[test]
    fn test_consecutive_losses_stops_at_win() {
        let trades = vec![close(dec!(-5)), close(dec!(-3)), close(dec!(10)), close(dec!(-1))];
        assert_eq!(consecutive_losses(&trades), 2);
    }

    #[test]
    fn test_consecutive_losses_skips_opens() {
        let trades = vec![close(dec!(-5)), open(), close(dec!(-3)), close(dec!(2))];
        assert_eq!(consecutive_losses(&trades), 2);
    }

    #[test]
    fn test_win_rate_requires_enough_closes() {
        let trades = vec![close(dec!(5)), close(dec!(-1))];
        assert_eq!(win_rate_last(&trades, 10), None);
    }

    #[test]
    fn test_win_rate_last_ten() {
        let mut trades = Vec::new();
        for i in 0..10 {
            trades.push(close(if i < 3 { dec!(5) } else { dec!(-1) }));
        }
        assert_eq!(win_rate_last(&trades, 10), Some(dec!(30)));
    }
}

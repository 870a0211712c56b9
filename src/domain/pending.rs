use crate::domain::types::Decision;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pending decision lives at most one hour.
pub const PENDING_TTL_SECS: i64 = 3600;

/// Lifecycle of a queued decision. Legal transitions:
/// pending -> approved -> executed | rejected, pending -> rejected,
/// pending -> expired. Only the queue module transitions rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
}

impl PendingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PendingStatus::Rejected | PendingStatus::Expired | PendingStatus::Executed
        )
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingStatus::Pending => write!(f, "pending"),
            PendingStatus::Approved => write!(f, "approved"),
            PendingStatus::Rejected => write!(f, "rejected"),
            PendingStatus::Expired => write!(f, "expired"),
            PendingStatus::Executed => write!(f, "executed"),
        }
    }
}

impl FromStr for PendingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PendingStatus::Pending),
            "approved" => Ok(PendingStatus::Approved),
            "rejected" => Ok(PendingStatus::Rejected),
            "expired" => Ok(PendingStatus::Expired),
            "executed" => Ok(PendingStatus::Executed),
            _ => anyhow::bail!("Invalid pending status: {}", s),
        }
    }
}

/// A proposed trade awaiting human action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDecision {
    pub id: i64,
    pub model_id: i64,
    pub coin: String,
    pub decision: Decision,
    pub explanation: Option<String>,
    pub status: PendingStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub resolved_at: Option<i64>,
    pub resolution_note: Option<String>,
    pub resolved_quantity: Option<Decimal>,
    pub resolved_leverage: Option<Decimal>,
}

impl PendingDecision {
    /// The decision as it should execute: approval-time overrides applied,
    /// every other field immutable.
    pub fn effective_decision(&self) -> Decision {
        let mut decision = self.decision.clone();
        if let Some(quantity) = self.resolved_quantity {
            decision.quantity = quantity;
        }
        if let Some(leverage) = self.resolved_leverage {
            decision.leverage = Some(leverage);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Signal;
    use rust_decimal_macros::dec;

    fn pending() -> PendingDecision {
        PendingDecision {
            id: 1,
            model_id: 1,
            coin: "BTC".to_string(),
            decision: Decision {
                signal: Signal::BuyToEnter,
                quantity: dec!(0.02),
                entry_price: dec!(40000),
                leverage: None,
                stop_loss: None,
                take_profit: None,
                confidence: 0.7,
                justification: "test".to_string(),
            },
            explanation: None,
            status: PendingStatus::Pending,
            created_at: 1000,
            expires_at: 1000 + PENDING_TTL_SECS,
            resolved_at: None,
            resolution_note: None,
            resolved_quantity: None,
            resolved_leverage: None,
        }
    }

    #[test]
    fn test_effective_decision_without_overrides() {
        let p = pending();
        assert_eq!(p.effective_decision().quantity, dec!(0.02));
    }

    #[test]
    fn test_effective_decision_applies_overrides() {
        let mut p = pending();
        p.resolved_quantity = Some(dec!(0.01));
        p.resolved_leverage = Some(dec!(2));
        let d = p.effective_decision();
        assert_eq!(d.quantity, dec!(0.01));
        assert_eq!(d.leverage, Some(dec!(2)));
        // Everything else untouched.
        assert_eq!(d.entry_price, dec!(40000));
        assert_eq!(d.signal, Signal::BuyToEnter);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!PendingStatus::Pending.is_terminal());
        assert!(!PendingStatus::Approved.is_terminal());
        assert!(PendingStatus::Executed.is_terminal());
        assert!(PendingStatus::Expired.is_terminal());
        assert!(PendingStatus::Rejected.is_terminal());
    }
}

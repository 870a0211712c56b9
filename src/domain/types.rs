use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side of a persisted trade log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    Close,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
            TradeSide::Close => write!(f, "close"),
        }
    }
}

impl FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            "close" => Ok(TradeSide::Close),
            _ => anyhow::bail!("Invalid trade side: {}", s),
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> PositionSide {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            _ => anyhow::bail!("Invalid position side: {}", s),
        }
    }
}

/// Wire-level order side for exchange calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Trading signal emitted by the AI decider for a single coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    BuyToEnter,
    SellToEnter,
    ClosePosition,
    Hold,
}

impl Signal {
    /// True for signals that would open (or extend) exposure.
    pub fn is_opener(&self) -> bool {
        matches!(self, Signal::BuyToEnter | Signal::SellToEnter)
    }

    /// True for signals the cycle acts on at all.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Signal::Hold)
    }

    /// Position direction a fresh open with this signal produces.
    pub fn position_side(&self) -> Option<PositionSide> {
        match self {
            Signal::BuyToEnter => Some(PositionSide::Long),
            Signal::SellToEnter => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::BuyToEnter => write!(f, "buy_to_enter"),
            Signal::SellToEnter => write!(f, "sell_to_enter"),
            Signal::ClosePosition => write!(f, "close_position"),
            Signal::Hold => write!(f, "hold"),
        }
    }
}

impl FromStr for Signal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy_to_enter" | "buy" => Ok(Signal::BuyToEnter),
            "sell_to_enter" | "sell" => Ok(Signal::SellToEnter),
            "close_position" | "close" => Ok(Signal::ClosePosition),
            "hold" => Ok(Signal::Hold),
            _ => anyhow::bail!("Invalid signal: {}", s),
        }
    }
}

/// Where a model's trades execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingEnvironment {
    Simulation,
    Live,
}

impl fmt::Display for TradingEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingEnvironment::Simulation => write!(f, "simulation"),
            TradingEnvironment::Live => write!(f, "live"),
        }
    }
}

impl FromStr for TradingEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" => Ok(TradingEnvironment::Simulation),
            "live" => Ok(TradingEnvironment::Live),
            _ => anyhow::bail!("Invalid trading environment: {}", s),
        }
    }
}

/// How a risk-approved decision is acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationLevel {
    Manual,
    Semi,
    Full,
}

impl fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutomationLevel::Manual => write!(f, "manual"),
            AutomationLevel::Semi => write!(f, "semi"),
            AutomationLevel::Full => write!(f, "full"),
        }
    }
}

impl FromStr for AutomationLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(AutomationLevel::Manual),
            "semi" => Ok(AutomationLevel::Semi),
            "full" => Ok(AutomationLevel::Full),
            _ => anyhow::bail!("Invalid automation level: {}", s),
        }
    }
}

/// Which exchange endpoint a live model trades against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeEnvironment {
    Testnet,
    Mainnet,
}

impl fmt::Display for ExchangeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeEnvironment::Testnet => write!(f, "testnet"),
            ExchangeEnvironment::Mainnet => write!(f, "mainnet"),
        }
    }
}

impl FromStr for ExchangeEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "testnet" => Ok(ExchangeEnvironment::Testnet),
            "mainnet" => Ok(ExchangeEnvironment::Mainnet),
            _ => anyhow::bail!("Invalid exchange environment: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Active,
    Paused,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStatus::Active => write!(f, "active"),
            ModelStatus::Paused => write!(f, "paused"),
        }
    }
}

impl FromStr for ModelStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ModelStatus::Active),
            "paused" => Ok(ModelStatus::Paused),
            _ => anyhow::bail!("Invalid model status: {}", s),
        }
    }
}

/// Incident severity, persisted as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => anyhow::bail!("Invalid severity: {}", s),
        }
    }
}

/// Audit-log incident categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    ModeChange,
    EnvironmentChange,
    AutomationChange,
    ProfileChange,
    TradeRejected,
    AutoPause,
    EmergencyPause,
    EmergencyStopAll,
    ExecutionError,
    ApiError,
    SystemInit,
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentType::ModeChange => "MODE_CHANGE",
            IncidentType::EnvironmentChange => "ENVIRONMENT_CHANGE",
            IncidentType::AutomationChange => "AUTOMATION_CHANGE",
            IncidentType::ProfileChange => "PROFILE_CHANGE",
            IncidentType::TradeRejected => "TRADE_REJECTED",
            IncidentType::AutoPause => "AUTO_PAUSE",
            IncidentType::EmergencyPause => "EMERGENCY_PAUSE",
            IncidentType::EmergencyStopAll => "EMERGENCY_STOP_ALL",
            IncidentType::ExecutionError => "EXECUTION_ERROR",
            IncidentType::ApiError => "API_ERROR",
            IncidentType::SystemInit => "SYSTEM_INIT",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for IncidentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MODE_CHANGE" => Ok(IncidentType::ModeChange),
            "ENVIRONMENT_CHANGE" => Ok(IncidentType::EnvironmentChange),
            "AUTOMATION_CHANGE" => Ok(IncidentType::AutomationChange),
            "PROFILE_CHANGE" => Ok(IncidentType::ProfileChange),
            "TRADE_REJECTED" => Ok(IncidentType::TradeRejected),
            "AUTO_PAUSE" => Ok(IncidentType::AutoPause),
            "EMERGENCY_PAUSE" => Ok(IncidentType::EmergencyPause),
            "EMERGENCY_STOP_ALL" => Ok(IncidentType::EmergencyStopAll),
            "EXECUTION_ERROR" => Ok(IncidentType::ExecutionError),
            "API_ERROR" => Ok(IncidentType::ApiError),
            "SYSTEM_INIT" => Ok(IncidentType::SystemInit),
            _ => anyhow::bail!("Invalid incident type: {}", s),
        }
    }
}

/// One AI trading decision for a single coin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub justification: String,
}

impl Decision {
    /// Notional value of the decision at its entry price.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.entry_price
    }
}

/// Exchange wire symbol for a basket coin (`BTC` -> `BTCUSDT`).
pub fn spot_symbol(coin: &str) -> String {
    format!("{}USDT", coin.to_uppercase())
}

/// Inverse of [`spot_symbol`]; returns the bare coin when the suffix matches.
pub fn coin_from_symbol(symbol: &str) -> Option<&str> {
    symbol.strip_suffix("USDT")
}

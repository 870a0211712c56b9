pub mod client;

pub use client::BinanceClient;

/// Spot REST endpoints per exchange environment.
pub const MAINNET_BASE_URL: &str = "https://api.binance.com";
pub const TESTNET_BASE_URL: &str = "https://testnet.binance.vision";

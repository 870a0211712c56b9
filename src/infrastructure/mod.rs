pub mod ai;
pub mod binance;
pub mod http_client_factory;
pub mod market_data;
pub mod mock;
pub mod persistence;

//! Binance spot client
//!
//! Thin wrapper around the spot REST API: balances, symbol rules, market and
//! limit orders, cancels, ping. Requests are signed with HMAC-SHA256; every
//! failure is classified into the shared exchange error taxonomy so call
//! sites can route incidents by kind.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{
    AssetBalance, ExchangeClient, OrderAck, OrderFill, SymbolRules, TimeInForce,
};
use crate::domain::types::OrderSide;
use crate::infrastructure::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

pub struct BinanceClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFill {
    price: String,
    qty: String,
    commission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    fills: Vec<RawFill>,
}

impl BinanceClient {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url,
        }
    }

    /// Generate HMAC-SHA256 signature for signed endpoints.
    fn sign_request(&self, query_string: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        let result = mac.finalize();
        hex::encode(result.into_bytes())
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .chain(std::iter::once(format!("timestamp={}", timestamp)))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign_request(&query_string);
        format!("{}{}?{}&signature={}", self.base_url, path, query_string, signature)
    }

    fn classify_transport(err: reqwest_middleware::Error) -> ExchangeError {
        let is_timeout = match &err {
            reqwest_middleware::Error::Reqwest(e) => e.is_timeout(),
            _ => false,
        };
        if is_timeout {
            ExchangeError::Network(format!("request timed out: {}", err))
        } else {
            ExchangeError::Network(err.to_string())
        }
    }

    /// Map an error response to the shared taxonomy using the HTTP status and
    /// Binance's error code.
    fn classify_api(status: reqwest::StatusCode, body: &str) -> ExchangeError {
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return ExchangeError::RateLimit(body.to_string());
        }

        let parsed: Option<ApiError> = serde_json::from_str(body).ok();
        match parsed {
            Some(api) => match api.code {
                -1022 | -2014 | -2015 => ExchangeError::Auth(api.msg),
                -2010 | -2019 => ExchangeError::InsufficientFunds(api.msg),
                -1013 | -1111 | -1121 => ExchangeError::SymbolFilter(api.msg),
                -1003 | -1015 => ExchangeError::RateLimit(api.msg),
                code => ExchangeError::Other {
                    code,
                    message: api.msg,
                },
            },
            None => ExchangeError::Other {
                code: status.as_u16() as i64,
                message: body.to_string(),
            },
        }
    }

    async fn read_response(
        response: reqwest::Response,
    ) -> Result<String, ExchangeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_api(status, &body));
        }
        Ok(body)
    }

    fn parse_decimal(raw: &str, what: &str) -> Result<Decimal, ExchangeError> {
        Decimal::from_str(raw).map_err(|e| ExchangeError::Other {
            code: 0,
            message: format!("Unparseable {} '{}': {}", what, raw, e),
        })
    }

    fn map_order(raw: RawOrder) -> Result<OrderAck, ExchangeError> {
        let mut fills = Vec::with_capacity(raw.fills.len());
        for fill in raw.fills {
            fills.push(OrderFill {
                price: Self::parse_decimal(&fill.price, "fill price")?,
                quantity: Self::parse_decimal(&fill.qty, "fill qty")?,
                commission: Self::parse_decimal(&fill.commission, "fill commission")?,
            });
        }
        let executed_quantity = if raw.executed_qty.is_empty() {
            Decimal::ZERO
        } else {
            Self::parse_decimal(&raw.executed_qty, "executed qty")?
        };
        Ok(OrderAck {
            order_id: raw.order_id.to_string(),
            status: raw.status,
            executed_quantity,
            fills,
        })
    }

    async fn place_order(
        &self,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<OrderAck, ExchangeError> {
        params.push(("newClientOrderId", Uuid::new_v4().to_string()));
        params.push(("newOrderRespType", "FULL".to_string()));

        let url = self.signed_url("/api/v3/order", &params);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let body = Self::read_response(response).await?;
        let raw: RawOrder = serde_json::from_str(&body).map_err(|e| ExchangeError::Other {
            code: 0,
            message: format!("Unparseable order response: {}", e),
        })?;

        info!(
            "Binance order {} accepted with status {}",
            raw.order_id, raw.status
        );
        Self::map_order(raw)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn ping(&self) -> Result<bool, ExchangeError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        Ok(response.status().is_success())
    }

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct Balance {
            asset: String,
            free: String,
            locked: String,
        }
        #[derive(Debug, Deserialize)]
        struct Account {
            balances: Vec<Balance>,
        }

        let url = self.signed_url("/api/v3/account", &[]);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let body = Self::read_response(response).await?;
        let account: Account = serde_json::from_str(&body).map_err(|e| ExchangeError::Other {
            code: 0,
            message: format!("Unparseable account response: {}", e),
        })?;

        let balance = account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset));
        match balance {
            Some(b) => Ok(AssetBalance {
                asset: b.asset,
                free: Self::parse_decimal(&b.free, "free balance")?,
                locked: Self::parse_decimal(&b.locked, "locked balance")?,
            }),
            None => Ok(AssetBalance {
                asset: asset.to_string(),
                free: Decimal::ZERO,
                locked: Decimal::ZERO,
            }),
        }
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct Ticker {
            price: String,
        }

        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let body = Self::read_response(response).await?;
        let ticker: Ticker = serde_json::from_str(&body).map_err(|e| ExchangeError::Other {
            code: 0,
            message: format!("Unparseable ticker response: {}", e),
        })?;
        Self::parse_decimal(&ticker.price, "ticker price")
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Filter {
            filter_type: String,
            #[serde(default)]
            step_size: Option<String>,
            #[serde(default)]
            tick_size: Option<String>,
            #[serde(default)]
            min_notional: Option<String>,
        }
        #[derive(Debug, Deserialize)]
        struct SymbolInfo {
            symbol: String,
            filters: Vec<Filter>,
        }
        #[derive(Debug, Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<SymbolInfo>,
        }

        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let body = Self::read_response(response).await?;
        let info: ExchangeInfo = serde_json::from_str(&body).map_err(|e| ExchangeError::Other {
            code: 0,
            message: format!("Unparseable exchangeInfo response: {}", e),
        })?;

        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::SymbolFilter(format!("Unknown symbol {}", symbol)))?;

        let mut rules = SymbolRules {
            symbol: symbol.to_string(),
            step_size: Decimal::ZERO,
            tick_size: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        };
        for filter in symbol_info.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(step) = filter.step_size {
                        rules.step_size = Self::parse_decimal(&step, "stepSize")?;
                    }
                }
                "PRICE_FILTER" => {
                    if let Some(tick) = filter.tick_size {
                        rules.tick_size = Self::parse_decimal(&tick, "tickSize")?;
                    }
                }
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    if let Some(min) = filter.min_notional {
                        rules.min_notional = Self::parse_decimal(&min, "minNotional")?;
                    }
                }
                _ => {}
            }
        }
        Ok(rules)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(vec![
            ("symbol", symbol.to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
        ])
        .await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        tif: TimeInForce,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(vec![
            ("symbol", symbol.to_string()),
            ("side", side.to_string()),
            ("type", "LIMIT".to_string()),
            ("quantity", quantity.to_string()),
            ("price", price.to_string()),
            ("timeInForce", tif.as_str().to_string()),
        ])
        .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let url = self.signed_url(
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        );
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        Self::read_response(response).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: Option<&str>) -> Result<(), ExchangeError> {
        let Some(symbol) = symbol else {
            warn!("cancel_all_orders without a symbol is a no-op on the spot API");
            return Ok(());
        };
        let url = self.signed_url("/api/v3/openOrders", &[("symbol", symbol.to_string())]);
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        Self::read_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_error() {
        let err = BinanceClient::classify_api(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"code":-2014,"msg":"API-key format invalid."}"#,
        );
        assert!(matches!(err, ExchangeError::Auth(_)));
    }

    #[test]
    fn test_classify_insufficient_funds() {
        let err = BinanceClient::classify_api(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"code":-2010,"msg":"Account has insufficient balance."}"#,
        );
        assert!(matches!(err, ExchangeError::InsufficientFunds(_)));
    }

    #[test]
    fn test_classify_filter_violation() {
        let err = BinanceClient::classify_api(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"code":-1013,"msg":"Filter failure: LOT_SIZE"}"#,
        );
        assert!(matches!(err, ExchangeError::SymbolFilter(_)));
    }

    #[test]
    fn test_classify_http_rate_limit() {
        let err = BinanceClient::classify_api(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(matches!(err, ExchangeError::RateLimit(_)));
    }

    #[test]
    fn test_classify_unknown_body() {
        let err =
            BinanceClient::classify_api(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(matches!(err, ExchangeError::Other { code: 500, .. }));
    }
}

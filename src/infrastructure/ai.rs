//! AI decision source over an OpenAI-compatible chat-completions endpoint.
//!
//! The prompt carries the market snapshot, the model's portfolio and its risk
//! parameters; the reply must be a JSON object mapping each coin to a
//! decision. Replies wrapped in markdown code fences are tolerated.

use crate::domain::model::{Model, ModelSettings};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::ports::{DecisionService, MarketSnapshot};
use crate::domain::types::Decision;
use crate::infrastructure::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

const DECIDER_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiDecider {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAiDecider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: HttpClientFactory::create_client_with_timeout(DECIDER_TIMEOUT),
            base_url,
            api_key,
        }
    }

    fn system_prompt() -> &'static str {
        "You are a disciplined crypto trading analyst. For every coin you are \
         given, decide one of: buy_to_enter, sell_to_enter, close_position, \
         hold. Respect the account's risk limits. Reply with a single JSON \
         object keyed by coin symbol, each value an object with fields: \
         signal, quantity, entry_price, stop_loss, take_profit, confidence \
         (0-1), justification. Use numbers, not strings, for numeric fields. \
         Consider RSI(14), MACD, EMA(20), EMA(50) and ATR(14) where provided. \
         No prose outside the JSON object."
    }

    fn user_prompt(
        settings: &ModelSettings,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> String {
        let mut prompt = String::from("Market snapshot:\n");
        let mut coins: Vec<&String> = market.tickers.keys().collect();
        coins.sort();
        for coin in coins {
            let ticker = &market.tickers[coin];
            let _ = writeln!(
                prompt,
                "- {}: price {} ({}% 24h)",
                coin, ticker.price, ticker.change_24h_pct
            );
        }

        let _ = writeln!(prompt, "\nPortfolio: cash {}", portfolio.cash);
        for position in &portfolio.positions {
            let _ = writeln!(
                prompt,
                "- {} {} {} @ avg {}",
                position.side, position.quantity, position.coin, position.avg_entry_price
            );
        }

        let _ = writeln!(
            prompt,
            "\nRisk limits: max position {}% of equity, max {} trades/day, \
             max {} open positions, min cash reserve {}%.",
            settings.max_position_size_pct,
            settings.max_daily_trades,
            settings.max_open_positions,
            settings.min_cash_reserve_pct
        );
        prompt.push_str("\nReturn your decision object now.");
        prompt
    }

    /// Strip markdown code fences some providers wrap JSON replies in.
    fn strip_fences(content: &str) -> &str {
        let trimmed = content.trim();
        let Some(inner) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        inner.strip_suffix("```").unwrap_or(inner).trim()
    }

    fn parse_decisions(
        content: &str,
        market: &MarketSnapshot,
    ) -> Result<HashMap<String, Decision>> {
        let payload = Self::strip_fences(content);
        let raw: HashMap<String, Decision> =
            serde_json::from_str(payload).context("AI reply is not a per-coin decision map")?;

        let mut decisions = HashMap::new();
        for (coin, mut decision) in raw {
            let coin = coin.to_uppercase();
            // Backfill a missing entry price from the snapshot.
            if decision.entry_price <= Decimal::ZERO
                && let Some(price) = market.price(&coin)
            {
                decision.entry_price = price;
            }
            decisions.insert(coin, decision);
        }
        Ok(decisions)
    }
}

#[async_trait]
impl DecisionService for OpenAiDecider {
    async fn decide(
        &self,
        model: &Model,
        settings: &ModelSettings,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> Result<HashMap<String, Decision>> {
        let request = ChatRequest {
            model: &model.ai_model,
            temperature: settings.ai_temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Self::system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(settings, market, portfolio),
                },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.context("AI provider unreachable")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("AI provider returned {}: {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Unparseable AI provider response")?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .context("AI provider returned no choices")?;

        let decisions = Self::parse_decisions(content, market)?;
        debug!(
            "Model {} received {} decisions from {}",
            model.id,
            decisions.len(),
            model.ai_model
        );
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{CoinTicker, IndicatorSet};
    use crate::domain::types::Signal;
    use rust_decimal_macros::dec;

    fn market() -> MarketSnapshot {
        let mut tickers = HashMap::new();
        tickers.insert(
            "BTC".to_string(),
            CoinTicker {
                coin: "BTC".to_string(),
                price: dec!(40000),
                change_24h_pct: dec!(1.5),
                indicators: IndicatorSet::default(),
            },
        );
        MarketSnapshot {
            tickers,
            fetched_at: 0,
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let content = r#"{"BTC": {"signal": "buy_to_enter", "quantity": 0.02,
            "entry_price": 40000, "confidence": 0.7, "justification": "momentum"}}"#;
        let decisions = OpenAiDecider::parse_decisions(content, &market()).unwrap();
        assert_eq!(decisions["BTC"].signal, Signal::BuyToEnter);
        assert_eq!(decisions["BTC"].quantity, dec!(0.02));
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"BTC\": {\"signal\": \"hold\", \"quantity\": 0, \"entry_price\": 0}}\n```";
        let decisions = OpenAiDecider::parse_decisions(content, &market()).unwrap();
        assert_eq!(decisions["BTC"].signal, Signal::Hold);
        // Entry price backfilled from the snapshot.
        assert_eq!(decisions["BTC"].entry_price, dec!(40000));
    }

    #[test]
    fn test_parse_rejects_prose() {
        let content = "I think you should buy BTC because it is going up.";
        assert!(OpenAiDecider::parse_decisions(content, &market()).is_err());
    }

    #[test]
    fn test_lowercase_coin_normalized() {
        let content = r#"{"btc": {"signal": "hold", "quantity": 0, "entry_price": 1}}"#;
        let decisions = OpenAiDecider::parse_decisions(content, &market()).unwrap();
        assert!(decisions.contains_key("BTC"));
    }
}

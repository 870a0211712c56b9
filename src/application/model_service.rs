//! Operator mutations on models. Environment and automation are independent
//! setters, each with its own incident type, so all six combinations of
//! (environment x automation) stay expressible.

use crate::domain::model::Model;
use crate::domain::types::{
    AutomationLevel, ExchangeEnvironment, IncidentType, ModelStatus, Severity, TradingEnvironment,
};
use crate::infrastructure::persistence::Store;
use crate::infrastructure::persistence::store::NewModel;
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub struct ModelService {
    store: Arc<Store>,
}

impl ModelService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a model with default (Balanced) settings. The returned model
    /// carries the server-assigned id; ids may skip values.
    pub async fn create_model(&self, new: NewModel) -> Result<Model> {
        self.store.create_model(&new).await
    }

    pub async fn set_status(&self, model_id: i64, status: ModelStatus) -> Result<()> {
        let model = self.store.get_model(model_id).await?;
        if model.status == status {
            return Ok(());
        }
        self.store.set_status(model_id, status).await?;
        self.store
            .append_incident(
                Some(model_id),
                IncidentType::ModeChange,
                Severity::Low,
                &format!("Model status {} -> {}", model.status, status),
                json!({ "previous": model.status.to_string(), "new": status.to_string() }),
            )
            .await?;
        Ok(())
    }

    pub async fn set_trading_environment(
        &self,
        model_id: i64,
        environment: TradingEnvironment,
    ) -> Result<()> {
        let model = self.store.get_model(model_id).await?;
        if model.trading_environment == environment {
            return Ok(());
        }
        self.store
            .set_trading_environment(model_id, environment)
            .await?;
        self.store
            .append_incident(
                Some(model_id),
                IncidentType::EnvironmentChange,
                Severity::Low,
                &format!(
                    "Trading environment {} -> {}",
                    model.trading_environment, environment
                ),
                json!({
                    "previous": model.trading_environment.to_string(),
                    "new": environment.to_string(),
                }),
            )
            .await?;
        info!("Model {} environment set to {}", model_id, environment);
        Ok(())
    }

    pub async fn set_automation_level(
        &self,
        model_id: i64,
        level: AutomationLevel,
    ) -> Result<()> {
        let model = self.store.get_model(model_id).await?;
        if model.automation_level == level {
            return Ok(());
        }
        self.store.set_automation_level(model_id, level).await?;
        self.store
            .append_incident(
                Some(model_id),
                IncidentType::AutomationChange,
                Severity::Low,
                &format!("Automation level {} -> {}", model.automation_level, level),
                json!({
                    "previous": model.automation_level.to_string(),
                    "new": level.to_string(),
                }),
            )
            .await?;
        info!("Model {} automation set to {}", model_id, level);
        Ok(())
    }

    pub async fn set_exchange_environment(
        &self,
        model_id: i64,
        environment: ExchangeEnvironment,
    ) -> Result<()> {
        let model = self.store.get_model(model_id).await?;
        if model.exchange_environment == environment {
            return Ok(());
        }
        self.store
            .set_exchange_environment(model_id, environment)
            .await?;
        self.store
            .append_incident(
                Some(model_id),
                IncidentType::EnvironmentChange,
                Severity::Low,
                &format!(
                    "Exchange environment {} -> {}",
                    model.exchange_environment, environment
                ),
                json!({
                    "kind": "exchange",
                    "previous": model.exchange_environment.to_string(),
                    "new": environment.to_string(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Store exchange credentials for a model. The registry picks up the new
    /// row on the next executor lookup via the credential version.
    pub async fn set_credentials(
        &self,
        model_id: i64,
        environment: ExchangeEnvironment,
        api_key: &str,
        api_secret: &str,
    ) -> Result<()> {
        self.store
            .set_credentials(model_id, environment, api_key, api_secret)
            .await
    }
}

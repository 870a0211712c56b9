//! The single model registry owned by the scheduler.
//!
//! Holds the per-model cycle locks (cycles serialize within a model and run
//! concurrently across models), the global lock for cross-model operations,
//! and the lazily-built per-model live executors. Exchange clients are keyed
//! by the credential row's updated_at, so changing credentials invalidates
//! the cached client on the next lookup.

use crate::application::execution::{EnvironmentExecutor, LiveExecutor, SimulationExecutor};
use crate::domain::model::Model;
use crate::domain::ports::ExchangeClient;
use crate::domain::types::{ExchangeEnvironment, TradingEnvironment};
use crate::infrastructure::binance::{BinanceClient, MAINNET_BASE_URL, TESTNET_BASE_URL};
use crate::infrastructure::persistence::Store;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

struct CachedLive {
    executor: Arc<LiveExecutor>,
    environment: ExchangeEnvironment,
    credentials_version: i64,
}

/// Environment credential overrides from the process environment; stored
/// credentials take precedence.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

pub struct ModelRegistry {
    store: Arc<Store>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    global: Arc<Mutex<()>>,
    simulation: Arc<SimulationExecutor>,
    live: RwLock<HashMap<i64, CachedLive>>,
    overrides: CredentialOverrides,
}

impl ModelRegistry {
    pub fn new(store: Arc<Store>, overrides: CredentialOverrides) -> Self {
        Self {
            simulation: Arc::new(SimulationExecutor::new(store.clone())),
            store,
            locks: Mutex::new(HashMap::new()),
            global: Arc::new(Mutex::new(())),
            live: RwLock::new(HashMap::new()),
            overrides,
        }
    }

    /// Acquire the model's cycle lock. Held for the duration of a cycle (or
    /// an approval execution), serializing all mutations for that model.
    pub async fn lock_model(&self, model_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(model_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// The global lock serializing cross-model operations (emergency stop
    /// all, registry reconfiguration).
    pub async fn lock_global(&self) -> OwnedMutexGuard<()> {
        self.global.clone().lock_owned().await
    }

    /// Drop per-model state (lock and cached client) for a removed model.
    pub async fn remove_model(&self, model_id: i64) {
        let _guard = self.lock_global().await;
        self.locks.lock().await.remove(&model_id);
        self.live.write().await.remove(&model_id);
    }

    /// Resolve the environment executor for a model's current configuration.
    pub async fn executor_for(&self, model: &Model) -> Result<Arc<dyn EnvironmentExecutor>> {
        match model.trading_environment {
            TradingEnvironment::Simulation => Ok(self.simulation.clone()),
            TradingEnvironment::Live => {
                let executor = self.live_executor_for(model).await?;
                Ok(executor)
            }
        }
    }

    async fn live_executor_for(&self, model: &Model) -> Result<Arc<LiveExecutor>> {
        // Injected executors (tests) bypass credential resolution.
        {
            let cache = self.live.read().await;
            if let Some(entry) = cache.get(&model.id)
                && entry.credentials_version == i64::MAX
                && entry.environment == model.exchange_environment
            {
                return Ok(entry.executor.clone());
            }
        }

        let stored = self
            .store
            .get_credentials(model.id, model.exchange_environment)
            .await?;

        let (api_key, api_secret, version) = match stored {
            Some((key, secret, updated_at)) => (key, secret, updated_at),
            None => {
                let key = self
                    .overrides
                    .api_key
                    .clone()
                    .with_context(|| {
                        format!(
                            "No exchange credentials for model {} ({})",
                            model.id, model.exchange_environment
                        )
                    })?;
                let secret = self
                    .overrides
                    .api_secret
                    .clone()
                    .context("Exchange API secret override missing")?;
                (key, secret, 0)
            }
        };

        {
            let cache = self.live.read().await;
            if let Some(entry) = cache.get(&model.id)
                && entry.environment == model.exchange_environment
                && entry.credentials_version == version
            {
                return Ok(entry.executor.clone());
            }
        }

        let base_url = match model.exchange_environment {
            ExchangeEnvironment::Testnet => TESTNET_BASE_URL,
            ExchangeEnvironment::Mainnet => MAINNET_BASE_URL,
        };
        let client: Arc<dyn ExchangeClient> =
            Arc::new(BinanceClient::new(api_key, api_secret, base_url.to_string()));
        let executor = Arc::new(LiveExecutor::new(self.store.clone(), client));

        info!(
            "Built live executor for model {} against {}",
            model.id, model.exchange_environment
        );
        self.live.write().await.insert(
            model.id,
            CachedLive {
                executor: executor.clone(),
                environment: model.exchange_environment,
                credentials_version: version,
            },
        );
        Ok(executor)
    }

    /// Inject a prebuilt live executor (tests wire the mock exchange in here).
    pub async fn install_live_executor(
        &self,
        model_id: i64,
        environment: ExchangeEnvironment,
        exchange: Arc<dyn ExchangeClient>,
    ) {
        let executor = Arc::new(LiveExecutor::new(self.store.clone(), exchange));
        self.live.write().await.insert(
            model_id,
            CachedLive {
                executor,
                environment,
                // i64::MAX keeps the injected client ahead of any stored row.
                credentials_version: i64::MAX,
            },
        );
    }
}

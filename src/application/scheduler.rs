//! Drives trading cycles across all active models.
//!
//! One supervisor loop reconciles the set of per-model ticker tasks against
//! the store every 30 seconds (picking up new models and interval changes),
//! a sweeper expires pending decisions once a minute, and the emergency
//! operations run under the registry's global lock.

use crate::application::pending_queue::PendingQueue;
use crate::application::registry::ModelRegistry;
use crate::application::trading_executor::TradingExecutor;
use crate::domain::types::{
    AutomationLevel, IncidentType, Severity, TradingEnvironment,
};
use crate::infrastructure::persistence::Store;
use anyhow::{Result, bail};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct ModelTask {
    handle: JoinHandle<()>,
    interval_minutes: i64,
}

pub struct Scheduler {
    store: Arc<Store>,
    registry: Arc<ModelRegistry>,
    executor: Arc<TradingExecutor>,
    queue: Arc<PendingQueue>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<HashMap<i64, ModelTask>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ModelRegistry>,
        executor: Arc<TradingExecutor>,
        queue: Arc<PendingQueue>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            store,
            registry,
            executor,
            queue,
            shutdown_tx,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Supervisor loop. Returns after `shutdown()` once in-flight cycles have
    /// drained.
    pub async fn run(self: Arc<Self>) {
        info!("Scheduler started");
        let sweeper = self.clone().spawn_sweep_loop();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut reconcile = tokio::time::interval(RECONCILE_INTERVAL);

        loop {
            tokio::select! {
                _ = reconcile.tick() => {
                    if let Err(e) = self.clone().reconcile().await {
                        error!("Scheduler reconcile failed: {:#}", e);
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler draining in-flight cycles...");
        self.drain().await;
        sweeper.abort();
        info!("Scheduler stopped");
    }

    /// Align the per-model tasks with the store: start loops for new active
    /// models, restart loops whose interval changed, stop loops for models
    /// that went away or paused.
    async fn reconcile(self: Arc<Self>) -> Result<()> {
        let models = self.store.list_active_models().await?;
        let mut desired: HashMap<i64, i64> = HashMap::new();
        for model in &models {
            let settings = self.store.get_settings(model.id).await?;
            desired.insert(model.id, settings.effective_interval_minutes());
        }

        let mut tasks = self.tasks.lock().await;

        tasks.retain(|model_id, task| {
            let keep = desired.get(model_id) == Some(&task.interval_minutes);
            if !keep {
                task.handle.abort();
                debug!("Stopped cycle loop for model {}", model_id);
            }
            keep
        });

        for (model_id, interval_minutes) in desired {
            if !tasks.contains_key(&model_id) {
                let handle = self.clone().spawn_model_loop(model_id, interval_minutes);
                tasks.insert(
                    model_id,
                    ModelTask {
                        handle,
                        interval_minutes,
                    },
                );
                info!(
                    "Started cycle loop for model {} every {} min",
                    model_id, interval_minutes
                );
            }
        }

        Ok(())
    }

    fn spawn_model_loop(self: Arc<Self>, model_id: i64, interval_minutes: i64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval_minutes as u64 * 60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.store.scheduler_enabled().await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("Scheduler disabled; skipping cycle for model {}", model_id);
                        continue;
                    }
                    Err(e) => {
                        error!("Scheduler toggle read failed: {:#}", e);
                        continue;
                    }
                }

                match self.executor.run_cycle(model_id).await {
                    Ok(report) => {
                        if let Some(reason) = &report.aborted {
                            warn!("Cycle for model {} aborted: {}", model_id, reason);
                        }
                    }
                    Err(e) => error!("Cycle for model {} errored: {:#}", model_id, e),
                }
            }
        })
    }

    fn spawn_sweep_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = self.queue.expire_sweep().await {
                    error!("Pending expire sweep failed: {:#}", e);
                }
            }
        })
    }

    /// Reduce a model's automation to a level requiring human action.
    pub async fn emergency_pause(&self, model_id: i64, target: AutomationLevel) -> Result<()> {
        if target == AutomationLevel::Full {
            bail!("Emergency pause target must be semi or manual");
        }
        let _global = self.registry.lock_global().await;

        let model = self.store.get_model(model_id).await?;
        self.store.set_automation_level(model_id, target).await?;
        self.store
            .append_incident(
                Some(model_id),
                IncidentType::EmergencyPause,
                Severity::High,
                &format!(
                    "Emergency pause: automation {} -> {}",
                    model.automation_level, target
                ),
                json!({
                    "previous": model.automation_level.to_string(),
                    "new": target.to_string(),
                }),
            )
            .await?;
        warn!("Emergency pause for model {} -> {}", model_id, target);
        Ok(())
    }

    /// Force every model into simulation. Returns the models that were live
    /// with their previous environments. Idempotent: when nothing was live,
    /// nothing changes and no incident is written. Already-submitted exchange
    /// orders are left alone.
    pub async fn emergency_stop_all(&self) -> Result<Vec<(i64, TradingEnvironment)>> {
        let _global = self.registry.lock_global().await;

        let models = self.store.list_models().await?;
        let mut affected = Vec::new();
        for model in &models {
            if model.trading_environment == TradingEnvironment::Live {
                self.store
                    .set_trading_environment(model.id, TradingEnvironment::Simulation)
                    .await?;
                affected.push((model.id, model.trading_environment));
            }
        }

        if affected.is_empty() {
            info!("Emergency stop all: no live models; nothing to do");
            return Ok(affected);
        }

        let details: Vec<serde_json::Value> = affected
            .iter()
            .map(|(id, env)| {
                json!({ "model_id": id, "previous_environment": env.to_string() })
            })
            .collect();
        self.store
            .append_incident(
                None,
                IncidentType::EmergencyStopAll,
                Severity::Critical,
                &format!("Emergency stop all: {} models forced to simulation", affected.len()),
                json!({ "affected": details }),
            )
            .await?;
        warn!(
            "EMERGENCY STOP ALL: {} models forced to simulation",
            affected.len()
        );
        Ok(affected)
    }

    /// Global toggle: disable or re-enable all cycles without unloading
    /// state.
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store.set_scheduler_enabled(enabled).await?;
        info!(
            "Scheduler {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for in-flight cycles, then stop all model loops. Acquiring each
    /// model's lock once guarantees its running cycle has finished.
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        let ids: Vec<i64> = tasks.keys().copied().collect();
        for model_id in ids {
            let _guard = self.registry.lock_model(model_id).await;
        }
        for (_, task) in tasks.drain() {
            task.handle.abort();
        }
    }
}

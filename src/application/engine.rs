//! Composition root and public entry points.
//!
//! Holds the exchange / strategy / frame / risk registries and wires a
//! `(strategy, symbol)` lane together per run: backtests get a fresh
//! in-memory store and their own risk manager; live runs share the file
//! store and one risk manager per risk group.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

use crate::application::backtest::BacktestDriver;
use crate::application::live::LiveDriver;
use crate::application::risk::RiskManager;
use crate::application::strategy::ClientStrategy;
use crate::config::Config;
use crate::domain::events::SignalEvent;
use crate::domain::schema::{ExchangeSchema, FrameSchema, RiskSchema, StrategySchema};
use crate::domain::types::TickOutcome;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::ExchangeGateway;
use crate::infrastructure::persistence::{FileStore, MemoryStore};

/// Handle for a background run. Stopping is cooperative: the lane winds
/// down at its next safe state.
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.worker.abort();
    }

    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

pub struct Engine {
    config: Arc<Config>,
    bus: EventBus,
    exchanges: RwLock<HashMap<String, ExchangeSchema>>,
    strategies: RwLock<HashMap<String, StrategySchema>>,
    frames: RwLock<HashMap<String, FrameSchema>>,
    risks: RwLock<HashMap<String, RiskSchema>>,
    /// One shared manager per risk group for live lanes.
    live_risk: RwLock<HashMap<String, Arc<RiskManager>>>,
    live_store: Arc<FileStore>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let live_store = Arc::new(FileStore::new(config.persist_dir.clone()));
        Self {
            config: Arc::new(config),
            bus: EventBus::new(),
            exchanges: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            frames: RwLock::new(HashMap::new()),
            risks: RwLock::new(HashMap::new()),
            live_risk: RwLock::new(HashMap::new()),
            live_store,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to the lifecycle event stream.
    pub async fn subscribe(&self) -> Receiver<SignalEvent> {
        self.bus.subscribe().await
    }

    pub async fn register_exchange(&self, schema: ExchangeSchema) -> Result<()> {
        let mut exchanges = self.exchanges.write().await;
        if exchanges.contains_key(&schema.exchange_name) {
            anyhow::bail!("Exchange already registered: {}", schema.exchange_name);
        }
        exchanges.insert(schema.exchange_name.clone(), schema);
        Ok(())
    }

    pub async fn register_strategy(&self, schema: StrategySchema) -> Result<()> {
        let mut strategies = self.strategies.write().await;
        if strategies.contains_key(&schema.strategy_name) {
            anyhow::bail!("Strategy already registered: {}", schema.strategy_name);
        }
        strategies.insert(schema.strategy_name.clone(), schema);
        Ok(())
    }

    pub async fn register_frame(&self, schema: FrameSchema) -> Result<()> {
        if schema.end_date <= schema.start_date {
            anyhow::bail!(
                "Frame {} has an empty window: {} >= {}",
                schema.frame_name,
                schema.start_date,
                schema.end_date
            );
        }
        let mut frames = self.frames.write().await;
        if frames.contains_key(&schema.frame_name) {
            anyhow::bail!("Frame already registered: {}", schema.frame_name);
        }
        frames.insert(schema.frame_name.clone(), schema);
        Ok(())
    }

    pub async fn register_risk(&self, schema: RiskSchema) -> Result<()> {
        let mut risks = self.risks.write().await;
        if risks.contains_key(&schema.risk_name) {
            anyhow::bail!("Risk group already registered: {}", schema.risk_name);
        }
        risks.insert(schema.risk_name.clone(), schema);
        Ok(())
    }

    /// Deterministic historical run. Yields closed signals in order.
    pub async fn backtest_run(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
    ) -> Result<Receiver<TickOutcome>> {
        let (lane, frame, gateway) = self
            .build_backtest_lane(symbol, strategy_name, exchange_name, frame_name)
            .await?;
        Ok(BacktestDriver::new(lane, frame, gateway, self.bus.clone()).run())
    }

    pub async fn backtest_background(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
    ) -> Result<StopHandle> {
        let (lane, frame, gateway) = self
            .build_backtest_lane(symbol, strategy_name, exchange_name, frame_name)
            .await?;
        let stopped = lane.stop_flag();
        let mut rx = BacktestDriver::new(lane, frame, gateway, self.bus.clone()).run();
        let worker = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Ok(StopHandle { stopped, worker })
    }

    async fn build_backtest_lane(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
    ) -> Result<(ClientStrategy, FrameSchema, Arc<ExchangeGateway>)> {
        let exchange = self.exchange_schema(exchange_name).await?;
        let strategy_schema = self.strategy_schema(strategy_name).await?;
        let frame = self
            .frames
            .read()
            .await
            .get(frame_name)
            .cloned()
            .with_context(|| format!("Frame not registered: {}", frame_name))?;

        // Backtests are hermetic: in-memory slots, per-run risk state.
        let store = Arc::new(MemoryStore::new());
        let risk = match &strategy_schema.risk_name {
            Some(risk_name) => {
                let schema = self
                    .risks
                    .read()
                    .await
                    .get(risk_name)
                    .cloned()
                    .with_context(|| format!("Risk group not registered: {}", risk_name))?;
                Arc::new(RiskManager::new(schema, store.clone(), self.bus.clone()))
            }
            None => Arc::new(RiskManager::disabled(store.clone(), self.bus.clone())),
        };

        let gateway = Arc::new(ExchangeGateway::new(
            exchange.source.clone(),
            Arc::clone(&self.config),
        ));
        let lane = ClientStrategy::new(
            symbol,
            exchange.exchange_name.clone(),
            strategy_schema,
            Arc::clone(&gateway),
            store,
            risk,
            self.bus.clone(),
            Arc::clone(&self.config),
        )
        .with_frame(frame.frame_name.clone());

        Ok((lane, frame, gateway))
    }

    /// Real-time run. Yields opened / closed / cancelled transitions.
    pub async fn live_run(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
    ) -> Result<Receiver<TickOutcome>> {
        let (lane, _stopped) = self.build_live_lane(symbol, strategy_name, exchange_name).await?;
        Ok(LiveDriver::new(lane, self.bus.clone()).run())
    }

    pub async fn live_background(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
    ) -> Result<StopHandle> {
        let (lane, stopped) = self.build_live_lane(symbol, strategy_name, exchange_name).await?;
        let mut rx = LiveDriver::new(lane, self.bus.clone()).run();
        let worker = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Ok(StopHandle { stopped, worker })
    }

    async fn build_live_lane(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
    ) -> Result<(ClientStrategy, Arc<AtomicBool>)> {
        let exchange = self.exchange_schema(exchange_name).await?;
        let strategy_schema = self.strategy_schema(strategy_name).await?;
        let risk = self.live_risk_manager(&strategy_schema).await?;

        let gateway = Arc::new(ExchangeGateway::new(
            exchange.source.clone(),
            Arc::clone(&self.config),
        ));
        let lane = ClientStrategy::new(
            symbol,
            exchange.exchange_name.clone(),
            strategy_schema,
            gateway,
            self.live_store.clone(),
            risk,
            self.bus.clone(),
            Arc::clone(&self.config),
        );
        let stopped = lane.stop_flag();
        Ok((lane, stopped))
    }

    /// Get or create the shared risk manager for a strategy's risk group.
    async fn live_risk_manager(&self, schema: &StrategySchema) -> Result<Arc<RiskManager>> {
        let Some(risk_name) = &schema.risk_name else {
            return Ok(Arc::new(RiskManager::disabled(
                self.live_store.clone(),
                self.bus.clone(),
            )));
        };

        let mut managers = self.live_risk.write().await;
        if let Some(existing) = managers.get(risk_name) {
            return Ok(Arc::clone(existing));
        }

        let risk_schema = self
            .risks
            .read()
            .await
            .get(risk_name)
            .cloned()
            .with_context(|| format!("Risk group not registered: {}", risk_name))?;
        let manager = Arc::new(RiskManager::new(
            risk_schema,
            self.live_store.clone(),
            self.bus.clone(),
        ));
        managers.insert(risk_name.clone(), Arc::clone(&manager));
        Ok(manager)
    }

    async fn exchange_schema(&self, name: &str) -> Result<ExchangeSchema> {
        self.exchanges
            .read()
            .await
            .get(name)
            .cloned()
            .with_context(|| format!("Exchange not registered: {}", name))
    }

    async fn strategy_schema(&self, name: &str) -> Result<StrategySchema> {
        self.strategies
            .read()
            .await
            .get(name)
            .cloned()
            .with_context(|| format!("Strategy not registered: {}", name))
    }
}

//! In-memory persistence twin. Backtests use it so the slot contract
//! stays call-compatible while nothing durable is written.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::PersistenceError;
use crate::domain::repositories::{FiredMap, RiskStore, SignalStore};
use crate::domain::types::{ActivePosition, Signal};

#[derive(Default)]
struct Slots {
    pending: HashMap<String, Signal>,
    scheduled: HashMap<String, Signal>,
    fired: HashMap<String, FiredMap>,
    risk: HashMap<String, Vec<(String, ActivePosition)>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<Slots>>,
}

fn lane_key(strategy: &str, symbol: &str) -> String {
    format!("{}:{}", strategy, symbol)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn read_pending(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<Option<Signal>, PersistenceError> {
        Ok(self
            .slots
            .read()
            .await
            .pending
            .get(&lane_key(strategy, symbol))
            .cloned())
    }

    async fn write_pending(
        &self,
        strategy: &str,
        symbol: &str,
        signal: Option<&Signal>,
    ) -> Result<(), PersistenceError> {
        let mut slots = self.slots.write().await;
        match signal {
            Some(signal) => slots
                .pending
                .insert(lane_key(strategy, symbol), signal.clone()),
            None => slots.pending.remove(&lane_key(strategy, symbol)),
        };
        Ok(())
    }

    async fn read_scheduled(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<Option<Signal>, PersistenceError> {
        Ok(self
            .slots
            .read()
            .await
            .scheduled
            .get(&lane_key(strategy, symbol))
            .cloned())
    }

    async fn write_scheduled(
        &self,
        strategy: &str,
        symbol: &str,
        signal: Option<&Signal>,
    ) -> Result<(), PersistenceError> {
        let mut slots = self.slots.write().await;
        match signal {
            Some(signal) => slots
                .scheduled
                .insert(lane_key(strategy, symbol), signal.clone()),
            None => slots.scheduled.remove(&lane_key(strategy, symbol)),
        };
        Ok(())
    }

    async fn read_fired(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<FiredMap, PersistenceError> {
        Ok(self
            .slots
            .read()
            .await
            .fired
            .get(&lane_key(strategy, symbol))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_fired(
        &self,
        strategy: &str,
        symbol: &str,
        fired: &FiredMap,
    ) -> Result<(), PersistenceError> {
        self.slots
            .write()
            .await
            .fired
            .insert(lane_key(strategy, symbol), fired.clone());
        Ok(())
    }
}

#[async_trait]
impl RiskStore for MemoryStore {
    async fn read_positions(
        &self,
        risk_name: &str,
    ) -> Result<Vec<(String, ActivePosition)>, PersistenceError> {
        Ok(self
            .slots
            .read()
            .await
            .risk
            .get(risk_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_positions(
        &self,
        risk_name: &str,
        positions: &[(String, ActivePosition)],
    ) -> Result<(), PersistenceError> {
        self.slots
            .write()
            .await
            .risk
            .insert(risk_name.to_string(), positions.to_vec());
        Ok(())
    }
}

//! Portfolio-level risk gate.
//!
//! One `RiskManager` per risk group. Strategies sharing a `risk_name`
//! share one active-positions map; its mutations go through this
//! interface only and are persisted to the risk slot before they become
//! visible.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::errors::PersistenceError;
use crate::domain::events::SignalEvent;
use crate::domain::repositories::RiskStore;
use crate::domain::schema::{RiskCheck, RiskSchema};
use crate::domain::types::{ActivePosition, ExecutionContext, SignalProposal};
use crate::infrastructure::event_bus::EventBus;

/// Result of a portfolio risk check.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Approve,
    Reject(String),
}

impl ValidationResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationResult::Approve)
    }
}

fn lane_key(strategy: &str, symbol: &str) -> String {
    format!("{}:{}", strategy, symbol)
}

pub struct RiskManager {
    /// `None` disables the gate entirely (always approve, no persistence).
    risk_name: Option<String>,
    schema: RiskSchema,
    store: Arc<dyn RiskStore>,
    bus: EventBus,
    positions: RwLock<HashMap<String, ActivePosition>>,
    hydrated: RwLock<bool>,
}

impl RiskManager {
    pub fn new(schema: RiskSchema, store: Arc<dyn RiskStore>, bus: EventBus) -> Self {
        Self {
            risk_name: Some(schema.risk_name.clone()),
            schema,
            store,
            bus,
            positions: RwLock::new(HashMap::new()),
            hydrated: RwLock::new(false),
        }
    }

    /// The no-op gate used by strategies registered without a risk name.
    pub fn disabled(store: Arc<dyn RiskStore>, bus: EventBus) -> Self {
        Self {
            risk_name: None,
            schema: RiskSchema::default(),
            store,
            bus,
            positions: RwLock::new(HashMap::new()),
            hydrated: RwLock::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.risk_name.is_some()
    }

    /// Hydrate the active-positions map from the risk slot. Idempotent.
    pub async fn wait_for_init(&self) -> Result<(), PersistenceError> {
        let Some(risk_name) = &self.risk_name else {
            return Ok(());
        };

        let mut hydrated = self.hydrated.write().await;
        if *hydrated {
            return Ok(());
        }

        let stored = self.store.read_positions(risk_name).await?;
        let mut positions = self.positions.write().await;
        *positions = stored.into_iter().collect();
        *hydrated = true;
        debug!(
            "RiskManager [{}]: hydrated {} active positions",
            risk_name,
            positions.len()
        );
        Ok(())
    }

    /// Run user validations in declaration order; the first rejection
    /// wins and suppresses the rest.
    pub async fn check_signal(
        &self,
        proposal: &SignalProposal,
        ctx: &ExecutionContext,
        current_price: f64,
    ) -> ValidationResult {
        if !self.is_enabled() {
            return ValidationResult::Approve;
        }
        if let Err(e) = self.wait_for_init().await {
            warn!("RiskManager: init failed during check: {}", e);
        }

        let positions = self.positions.read().await;
        let check = RiskCheck {
            proposal,
            symbol: &ctx.symbol,
            strategy_name: &ctx.strategy_name,
            exchange_name: &ctx.exchange_name,
            current_price,
            timestamp: ctx.now,
            active_positions: &positions,
        };

        for validation in &self.schema.validations {
            if let Err(error) = (validation.validate)(&check) {
                let note = validation
                    .note
                    .clone()
                    .unwrap_or_else(|| error.to_string());
                self.bus
                    .publish(SignalEvent::RiskRejected {
                        symbol: ctx.symbol.clone(),
                        strategy_name: ctx.strategy_name.clone(),
                        note: note.clone(),
                    })
                    .await;
                return ValidationResult::Reject(note);
            }
        }

        self.bus
            .publish(SignalEvent::RiskApproved {
                symbol: ctx.symbol.clone(),
                strategy_name: ctx.strategy_name.clone(),
            })
            .await;
        ValidationResult::Approve
    }

    /// Record an opened position. Persisted before it becomes visible.
    pub async fn add_signal(
        &self,
        strategy: &str,
        symbol: &str,
        opened_at: i64,
    ) -> Result<(), PersistenceError> {
        let Some(risk_name) = &self.risk_name else {
            return Ok(());
        };
        self.wait_for_init().await?;

        let mut positions = self.positions.write().await;
        let mut next: Vec<(String, ActivePosition)> = positions
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let key = lane_key(strategy, symbol);
        next.retain(|(k, _)| k != &key);
        next.push((key.clone(), ActivePosition { opened_at }));

        self.store.write_positions(risk_name, &next).await?;
        positions.insert(key, ActivePosition { opened_at });
        Ok(())
    }

    pub async fn remove_signal(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<(), PersistenceError> {
        let Some(risk_name) = &self.risk_name else {
            return Ok(());
        };
        self.wait_for_init().await?;

        let mut positions = self.positions.write().await;
        let key = lane_key(strategy, symbol);
        let next: Vec<(String, ActivePosition)> = positions
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        self.store.write_positions(risk_name, &next).await?;
        positions.remove(&key);
        Ok(())
    }

    pub async fn active_position_count(&self) -> usize {
        self.positions.read().await.len()
    }
}

//! Persistence slot contracts.
//!
//! One slot triple per `(strategy, symbol)` lane (pending signal,
//! scheduled signal, fired partial-milestone levels) plus one
//! active-positions slot per risk group. Writes are atomic: either the
//! whole new value becomes visible or the old one remains. Reads return
//! the empty value for missing slots; a corrupt slot is deleted by the
//! backend and read as empty.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::PersistenceError;
use crate::domain::types::{ActivePosition, Signal};

/// Milestone levels already fired for one signal id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FiredLevels {
    #[serde(rename = "profitLevels")]
    pub profit: Vec<u8>,
    #[serde(rename = "lossLevels")]
    pub loss: Vec<u8>,
}

/// Fired milestone levels keyed by signal id.
pub type FiredMap = HashMap<String, FiredLevels>;

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn read_pending(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<Option<Signal>, PersistenceError>;

    /// Writing `None` clears the slot.
    async fn write_pending(
        &self,
        strategy: &str,
        symbol: &str,
        signal: Option<&Signal>,
    ) -> Result<(), PersistenceError>;

    async fn read_scheduled(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<Option<Signal>, PersistenceError>;

    async fn write_scheduled(
        &self,
        strategy: &str,
        symbol: &str,
        signal: Option<&Signal>,
    ) -> Result<(), PersistenceError>;

    async fn read_fired(&self, strategy: &str, symbol: &str)
    -> Result<FiredMap, PersistenceError>;

    async fn write_fired(
        &self,
        strategy: &str,
        symbol: &str,
        fired: &FiredMap,
    ) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait RiskStore: Send + Sync {
    /// Active positions of a risk group as `(lane key, position)` pairs.
    async fn read_positions(
        &self,
        risk_name: &str,
    ) -> Result<Vec<(String, ActivePosition)>, PersistenceError>;

    async fn write_positions(
        &self,
        risk_name: &str,
        positions: &[(String, ActivePosition)],
    ) -> Result<(), PersistenceError>;
}

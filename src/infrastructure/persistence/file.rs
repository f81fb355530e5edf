//! Default file-backed persistence.
//!
//! One JSON document per slot:
//! - `signal/{strategy}_{symbol}.json`   -> `{ "signalRow": Signal | null }`
//! - `schedule/{strategy}_{symbol}.json` -> `{ "scheduledRow": Signal | null }`
//! - `partial/{strategy}_{symbol}.json`  -> `{ "fired": { id: levels } }`
//! - `risk/{risk_name}.json`             -> `[[key, ActivePosition], ...]`
//!
//! Writes go to a `.tmp` sibling, are fsynced, then renamed over the
//! destination. A slot that fails to parse is deleted and read as empty.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::errors::PersistenceError;
use crate::domain::repositories::{FiredMap, RiskStore, SignalStore};
use crate::domain::types::{ActivePosition, Signal};

#[derive(Debug, Serialize, Deserialize)]
struct SignalSlot {
    #[serde(rename = "signalRow")]
    signal_row: Option<Signal>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleSlot {
    #[serde(rename = "scheduledRow")]
    scheduled_row: Option<Signal>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartialSlot {
    fired: FiredMap,
}

pub struct FileStore {
    root: PathBuf,
}

/// Keep slot file names path-safe for symbols like `BTC/USDT`.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            other => other,
        })
        .collect()
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn slot_path(&self, dir: &str, file: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", sanitize(file)))
    }

    fn lane_file(strategy: &str, symbol: &str) -> String {
        format!("{}_{}", strategy, symbol)
    }

    fn write_slot<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        let slot = path.display().to_string();
        let failed = |reason: String| PersistenceError::WriteFailed {
            slot: slot.clone(),
            reason,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(value).map_err(|e| failed(e.to_string()))?;

        // Atomic write: temp sibling, fsync, rename over the destination.
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content).map_err(|e| failed(e.to_string()))?;
        let temp_file = fs::File::open(&temp_path).map_err(|e| failed(e.to_string()))?;
        temp_file.sync_all().map_err(|e| failed(e.to_string()))?;
        fs::rename(&temp_path, path).map_err(|e| failed(e.to_string()))?;
        Ok(())
    }

    fn read_slot<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, PersistenceError> {
        if !path.exists() {
            return Ok(None);
        }

        let slot = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| PersistenceError::ReadFailed {
            slot: slot.clone(),
            reason: e.to_string(),
        })?;

        match serde_json::from_str::<T>(&content) {
            Ok(value) => Ok(Some(value)),
            Err(parse_err) => {
                // Corrupt slot: discard it and start fresh.
                warn!(
                    "FileStore: corrupt slot {} discarded ({})",
                    slot, parse_err
                );
                fs::remove_file(path).map_err(|e| PersistenceError::ReadFailed {
                    slot: slot.clone(),
                    reason: e.to_string(),
                })?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SignalStore for FileStore {
    async fn read_pending(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<Option<Signal>, PersistenceError> {
        let path = self.slot_path("signal", &Self::lane_file(strategy, symbol));
        Ok(self
            .read_slot::<SignalSlot>(&path)?
            .and_then(|slot| slot.signal_row))
    }

    async fn write_pending(
        &self,
        strategy: &str,
        symbol: &str,
        signal: Option<&Signal>,
    ) -> Result<(), PersistenceError> {
        let path = self.slot_path("signal", &Self::lane_file(strategy, symbol));
        self.write_slot(
            &path,
            &SignalSlot {
                signal_row: signal.cloned(),
            },
        )
    }

    async fn read_scheduled(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<Option<Signal>, PersistenceError> {
        let path = self.slot_path("schedule", &Self::lane_file(strategy, symbol));
        Ok(self
            .read_slot::<ScheduleSlot>(&path)?
            .and_then(|slot| slot.scheduled_row))
    }

    async fn write_scheduled(
        &self,
        strategy: &str,
        symbol: &str,
        signal: Option<&Signal>,
    ) -> Result<(), PersistenceError> {
        let path = self.slot_path("schedule", &Self::lane_file(strategy, symbol));
        self.write_slot(
            &path,
            &ScheduleSlot {
                scheduled_row: signal.cloned(),
            },
        )
    }

    async fn read_fired(
        &self,
        strategy: &str,
        symbol: &str,
    ) -> Result<FiredMap, PersistenceError> {
        let path = self.slot_path("partial", &Self::lane_file(strategy, symbol));
        Ok(self
            .read_slot::<PartialSlot>(&path)?
            .map(|slot| slot.fired)
            .unwrap_or_default())
    }

    async fn write_fired(
        &self,
        strategy: &str,
        symbol: &str,
        fired: &FiredMap,
    ) -> Result<(), PersistenceError> {
        let path = self.slot_path("partial", &Self::lane_file(strategy, symbol));
        self.write_slot(
            &path,
            &PartialSlot {
                fired: fired.clone(),
            },
        )
    }
}

#[async_trait]
impl RiskStore for FileStore {
    async fn read_positions(
        &self,
        risk_name: &str,
    ) -> Result<Vec<(String, ActivePosition)>, PersistenceError> {
        let path = self.slot_path("risk", risk_name);
        Ok(self
            .read_slot::<Vec<(String, ActivePosition)>>(&path)?
            .unwrap_or_default())
    }

    async fn write_positions(
        &self,
        risk_name: &str,
        positions: &[(String, ActivePosition)],
    ) -> Result<(), PersistenceError> {
        let path = self.slot_path("risk", risk_name);
        self.write_slot(&path, &positions)
    }
}

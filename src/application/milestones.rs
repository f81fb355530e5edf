//! Partial revenue milestones.
//!
//! Every 10% of gross revenue crossed for the first time fires one
//! informational event, separately for the profit and loss direction.
//! Fired levels persist with the signal so a restart never re-fires them.

use crate::domain::repositories::{FiredLevels, FiredMap};

pub const MILESTONE_LEVELS: [u8; 10] = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilestoneHit {
    pub level: u8,
    pub profit: bool,
}

/// Per-lane milestone state. Mutation is split into `peek` / `commit` so
/// the caller can persist the projected state before the in-memory set
/// changes; a failed write leaves the tracker untouched.
#[derive(Debug, Clone, Default)]
pub struct MilestoneTracker {
    fired: FiredMap,
}

impl MilestoneTracker {
    pub fn hydrate(fired: FiredMap) -> Self {
        Self { fired }
    }

    pub fn fired(&self) -> &FiredMap {
        &self.fired
    }

    /// Levels newly crossed at this revenue, without mutating state.
    pub fn peek(&self, signal_id: &str, revenue_percent: f64) -> Vec<MilestoneHit> {
        let empty = FiredLevels::default();
        let levels = self.fired.get(signal_id).unwrap_or(&empty);

        let mut hits = Vec::new();
        if revenue_percent >= 0.0 {
            for level in MILESTONE_LEVELS {
                if revenue_percent >= level as f64 && !levels.profit.contains(&level) {
                    hits.push(MilestoneHit {
                        level,
                        profit: true,
                    });
                }
            }
        } else {
            for level in MILESTONE_LEVELS {
                if -revenue_percent >= level as f64 && !levels.loss.contains(&level) {
                    hits.push(MilestoneHit {
                        level,
                        profit: false,
                    });
                }
            }
        }
        hits
    }

    /// The fired map as it will look once `hits` are recorded. This is
    /// what gets persisted ahead of [`MilestoneTracker::commit`].
    pub fn projected(&self, signal_id: &str, hits: &[MilestoneHit]) -> FiredMap {
        let mut fired = self.fired.clone();
        let levels = fired.entry(signal_id.to_string()).or_default();
        for hit in hits {
            let set = if hit.profit {
                &mut levels.profit
            } else {
                &mut levels.loss
            };
            if !set.contains(&hit.level) {
                set.push(hit.level);
                set.sort_unstable();
            }
        }
        fired
    }

    pub fn commit(&mut self, signal_id: &str, hits: &[MilestoneHit]) {
        self.fired = self.projected(signal_id, hits);
    }

    /// The fired map with one signal's entry removed (persisted when the
    /// signal closes).
    pub fn projected_without(&self, signal_id: &str) -> FiredMap {
        let mut fired = self.fired.clone();
        fired.remove(signal_id);
        fired
    }

    pub fn clear(&mut self, signal_id: &str) {
        self.fired.remove(signal_id);
    }
}

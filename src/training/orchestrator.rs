//! Training admission and status tracking
//!
//! A run moves `Idle → Checking → Training → Done`, or ends in `Rejected`
//! when a guard fails and `Failed` when the fit loop errors. Only one run can
//! hold the training slot at a time; a second request is refused without
//! touching the status of the running one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::dataset::pairs::DataBalance;
use crate::model::config::SiameseConfig;
use crate::utils::error::{EngineError, Result};

/// Where the current (or last) training run stands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TrainingStatus {
    #[default]
    Idle,
    Checking,
    Training { epoch: usize, total: usize },
    Done { epochs: usize },
    Rejected { reason: String },
    Failed { reason: String },
}

impl TrainingStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, TrainingStatus::Checking | TrainingStatus::Training { .. })
    }
}

#[derive(Debug, Default)]
struct Shared {
    active: AtomicBool,
    status: Mutex<TrainingStatus>,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, TrainingStatus> {
        // A poisoned lock only means a panic while writing a plain enum
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owner of the single training slot
#[derive(Debug, Clone, Default)]
pub struct TrainingOrchestrator {
    shared: Arc<Shared>,
}

impl TrainingOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TrainingStatus {
        self.shared.status().clone()
    }

    pub fn is_training(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// First two guards: enough pairs, then a free slot.
    ///
    /// Nothing is modified when either guard fails.
    pub fn begin(&self, pair_count: usize, config: &SiameseConfig) -> Result<TrainingRun> {
        check_pair_count(pair_count, config)?;

        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Training request refused: a run is already active");
            return Err(EngineError::TrainingInProgress);
        }

        *self.shared.status() = TrainingStatus::Checking;
        Ok(TrainingRun {
            shared: Arc::clone(&self.shared),
            finished: false,
        })
    }
}

/// Pairs must reach the configured minimum
pub fn check_pair_count(pair_count: usize, config: &SiameseConfig) -> Result<()> {
    if pair_count < config.min_training_pairs {
        return Err(EngineError::NotEnoughPairs {
            count: pair_count,
            required: config.min_training_pairs,
        });
    }
    Ok(())
}

/// Neither class may outnumber the other by more than the configured ratio
pub fn check_balance(balance: &DataBalance, config: &SiameseConfig) -> Result<()> {
    if !balance.within_ratio(config.max_imbalance_ratio) {
        return Err(EngineError::ImbalancedData {
            positive: balance.positive,
            negative: balance.negative,
            max_ratio: config.max_imbalance_ratio,
        });
    }
    Ok(())
}

/// An admitted run; releases the slot when dropped
#[derive(Debug)]
pub struct TrainingRun {
    shared: Arc<Shared>,
    finished: bool,
}

impl TrainingRun {
    pub fn set_epoch(&self, epoch: usize, total: usize) {
        *self.shared.status() = TrainingStatus::Training { epoch, total };
    }

    /// Record a guard failure and hand the error back
    pub fn reject(mut self, error: EngineError) -> EngineError {
        *self.shared.status() = TrainingStatus::Rejected {
            reason: error.to_string(),
        };
        self.finished = true;
        error
    }

    /// Record a fit failure and hand the error back
    pub fn fail(mut self, error: EngineError) -> EngineError {
        *self.shared.status() = TrainingStatus::Failed {
            reason: error.to_string(),
        };
        self.finished = true;
        error
    }

    pub fn complete(mut self, epochs: usize) {
        *self.shared.status() = TrainingStatus::Done { epochs };
        self.finished = true;
    }
}

impl Drop for TrainingRun {
    fn drop(&mut self) {
        if !self.finished {
            *self.shared.status() = TrainingStatus::Idle;
        }
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SiameseConfig {
        SiameseConfig::default()
    }

    #[test]
    fn test_not_enough_pairs_checked_first() {
        let orchestrator = TrainingOrchestrator::new();
        let _running = orchestrator.begin(10, &config()).unwrap();

        // Fewer than four pairs wins over "already in progress"
        let err = orchestrator.begin(3, &config()).unwrap_err();
        assert!(matches!(err, EngineError::NotEnoughPairs { count: 3, required: 4 }));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_second_run_rejected_without_status_change() {
        let orchestrator = TrainingOrchestrator::new();
        let run = orchestrator.begin(4, &config()).unwrap();
        run.set_epoch(3, 10);

        let err = orchestrator.begin(4, &config()).unwrap_err();
        assert!(matches!(err, EngineError::TrainingInProgress));
        assert_eq!(orchestrator.status(), TrainingStatus::Training { epoch: 3, total: 10 });
        assert!(orchestrator.is_training());

        run.complete(10);
        assert!(!orchestrator.is_training());
        assert_eq!(orchestrator.status(), TrainingStatus::Done { epochs: 10 });
    }

    #[test]
    fn test_slot_released_on_every_exit() {
        let orchestrator = TrainingOrchestrator::new();

        let run = orchestrator.begin(4, &config()).unwrap();
        let err = run.reject(EngineError::NotInitialized);
        assert_eq!(err.status(), 500);
        assert!(!orchestrator.is_training());
        assert!(matches!(orchestrator.status(), TrainingStatus::Rejected { .. }));

        let run = orchestrator.begin(4, &config()).unwrap();
        drop(run);
        assert!(!orchestrator.is_training());
        assert_eq!(orchestrator.status(), TrainingStatus::Idle);

        let run = orchestrator.begin(4, &config()).unwrap();
        let _ = run.fail(EngineError::Training("boom".into()));
        assert!(matches!(orchestrator.status(), TrainingStatus::Failed { .. }));
        assert!(orchestrator.begin(4, &config()).is_ok());
    }

    #[test]
    fn test_balance_guard() {
        let lopsided = DataBalance { positive: 10, negative: 5, total: 15 };
        let err = check_balance(&lopsided, &config()).unwrap_err();
        assert!(matches!(err, EngineError::ImbalancedData { positive: 10, negative: 5, .. }));

        let balanced = DataBalance { positive: 10, negative: 9, total: 19 };
        assert!(check_balance(&balanced, &config()).is_ok());
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let json = serde_json::to_string(&TrainingStatus::Training { epoch: 2, total: 5 }).unwrap();
        assert_eq!(json, r#"{"state":"training","epoch":2,"total":5}"#);
    }
}

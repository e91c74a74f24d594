//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Provision,
    Prepare,
    Build,
    Publish,
    Deploy,
}

impl Stage {
    /// All stages in the order they run
    pub const ALL: [Stage; 5] = [
        Stage::Provision,
        Stage::Prepare,
        Stage::Build,
        Stage::Publish,
        Stage::Deploy,
    ];

    /// The stage that follows this one, `None` after Deploy
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Provision => Some(Stage::Prepare),
            Stage::Prepare => Some(Stage::Build),
            Stage::Build => Some(Stage::Publish),
            Stage::Publish => Some(Stage::Deploy),
            Stage::Deploy => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Provision => "Provision",
            Stage::Prepare => "Prepare",
            Stage::Build => "Build",
            Stage::Publish => "Publish",
            Stage::Deploy => "Deploy",
        };
        f.write_str(name)
    }
}

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// A stage is currently running
    Running(Stage),
    /// Every stage completed
    Done,
    /// A stage failed; later stages were skipped
    Failed(Stage),
}

/// State of a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Passed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Not run because an earlier stage failed
    Skipped {
        reason: String,
    },
}

/// A host dropped from later stages after an operation failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostFailure {
    pub stage: Stage,
    pub host: String,
    pub error: String,
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// Per-stage state, in stage order
    pub stages: Vec<(Stage, StageState)>,

    /// Hosts that failed without failing their stage
    pub host_failures: Vec<HostFailure>,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            stages: Stage::ALL
                .iter()
                .map(|stage| (*stage, StageState::Pending))
                .collect(),
            host_failures: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        // Every stage is seeded in `new`
        &self.stages[stage as usize].1
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        &mut self.stages[stage as usize].1
    }

    /// Mark a stage as running
    pub fn start_stage(&mut self, stage: Stage) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = ExecutionStatus::Running(stage);
        *self.stage_mut(stage) = StageState::Running {
            started_at: Utc::now(),
        };
    }

    /// Mark a stage as passed
    pub fn pass_stage(&mut self, stage: Stage) {
        let started_at = self.stage_started_at(stage);
        *self.stage_mut(stage) = StageState::Passed {
            started_at,
            completed_at: Utc::now(),
        };
        if stage.next().is_none() {
            self.status = ExecutionStatus::Done;
            self.completed_at = Some(Utc::now());
        }
    }

    /// Mark a stage as failed and skip every stage after it
    pub fn fail_stage(&mut self, stage: Stage, error: String) {
        let started_at = self.stage_started_at(stage);
        *self.stage_mut(stage) = StageState::Failed {
            error,
            started_at,
            failed_at: Utc::now(),
        };

        let mut next = stage.next();
        while let Some(later) = next {
            *self.stage_mut(later) = StageState::Skipped {
                reason: format!("{} failed", stage),
            };
            next = later.next();
        }

        self.status = ExecutionStatus::Failed(stage);
        self.completed_at = Some(Utc::now());
    }

    /// Record a host failure that did not fail its stage
    pub fn record_host_failure(&mut self, stage: Stage, host: String, error: String) {
        self.host_failures.push(HostFailure { stage, host, error });
    }

    fn stage_started_at(&self, stage: Stage) -> DateTime<Utc> {
        match self.stage(stage) {
            StageState::Running { started_at } => *started_at,
            _ => Utc::now(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == ExecutionStatus::Done
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{InstanceId, MigrationPlanId, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    StopAndRecreate,
    CreateThenStop,
}

impl MigrationStrategy {
    /// The fixed step sequence for this strategy (§4.E). The only
    /// difference between the two is where `stop_source` sits relative to
    /// the target-creation steps.
    pub fn steps(&self) -> Vec<MigrationStepKind> {
        use MigrationStepKind::*;
        match self {
            MigrationStrategy::StopAndRecreate => vec![
                Prepare,
                ValidateSource,
                ValidateTargetProvider,
                StopSource,
                ExportSourceConfig,
                CreateTarget,
                StartTarget,
                VerifyTarget,
                CleanupSource,
                Complete,
            ],
            MigrationStrategy::CreateThenStop => vec![
                Prepare,
                ValidateSource,
                ValidateTargetProvider,
                ExportSourceConfig,
                CreateTarget,
                StartTarget,
                VerifyTarget,
                StopSource,
                CleanupSource,
                Complete,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStepKind {
    Prepare,
    ValidateSource,
    ValidateTargetProvider,
    StopSource,
    ExportSourceConfig,
    CreateTarget,
    StartTarget,
    VerifyTarget,
    CleanupSource,
    Complete,
}

impl std::fmt::Display for MigrationStepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationStepKind::Prepare => "prepare",
            MigrationStepKind::ValidateSource => "validate_source",
            MigrationStepKind::ValidateTargetProvider => "validate_target_provider",
            MigrationStepKind::StopSource => "stop_source",
            MigrationStepKind::ExportSourceConfig => "export_source_config",
            MigrationStepKind::CreateTarget => "create_target",
            MigrationStepKind::StartTarget => "start_target",
            MigrationStepKind::VerifyTarget => "verify_target",
            MigrationStepKind::CleanupSource => "cleanup_source",
            MigrationStepKind::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub kind: MigrationStepKind,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl MigrationStep {
    pub fn pending(kind: MigrationStepKind) -> Self {
        MigrationStep {
            kind,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl MigrationPlanStatus {
    /// Once a plan reaches one of these, it is terminal (§3, §8 invariant 2).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPlanStatus::Completed
                | MigrationPlanStatus::Failed
                | MigrationPlanStatus::Cancelled
                | MigrationPlanStatus::TimedOut
        )
    }
}

impl std::fmt::Display for MigrationPlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationPlanStatus::Pending => "pending",
            MigrationPlanStatus::InProgress => "in_progress",
            MigrationPlanStatus::Completed => "completed",
            MigrationPlanStatus::Failed => "failed",
            MigrationPlanStatus::Cancelled => "cancelled",
            MigrationPlanStatus::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Durable record of one migration attempt (§3, §4.E).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub id: MigrationPlanId,
    pub source_instance_id: InstanceId,
    pub source_kind: ProviderKind,
    pub target_kind: ProviderKind,
    pub strategy: MigrationStrategy,
    pub keep_source: bool,
    pub start_target: bool,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub steps: Vec<MigrationStep>,
    pub current_step_index: usize,
    pub status: MigrationPlanStatus,
    pub target_instance_id: Option<InstanceId>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub strategy: MigrationStrategy,
    pub keep_source: bool,
    pub start_target: bool,
    pub timeout_secs: u64,
}

impl MigrationPlan {
    pub fn new(
        id: MigrationPlanId,
        source_instance_id: InstanceId,
        source_kind: ProviderKind,
        target_kind: ProviderKind,
        opts: MigrationOptions,
    ) -> Self {
        let now = Utc::now();
        let steps = opts.strategy.steps().into_iter().map(MigrationStep::pending).collect();
        MigrationPlan {
            id,
            source_instance_id,
            source_kind,
            target_kind,
            strategy: opts.strategy,
            keep_source: opts.keep_source,
            start_target: opts.start_target,
            timeout_secs: opts.timeout_secs,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(opts.timeout_secs as i64),
            steps,
            current_step_index: 0,
            status: MigrationPlanStatus::Pending,
            target_instance_id: None,
            error: None,
            completed_at: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn current_step(&self) -> Option<&MigrationStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(strategy: MigrationStrategy) -> MigrationPlan {
        MigrationPlan::new(
            MigrationPlanId::new("p1"),
            InstanceId::new("src"),
            ProviderKind::new("container"),
            ProviderKind::new("cloud"),
            MigrationOptions {
                strategy,
                keep_source: false,
                start_target: true,
                timeout_secs: 60,
            },
        )
    }

    #[test]
    fn stop_and_recreate_orders_stop_before_create() {
        let p = plan(MigrationStrategy::StopAndRecreate);
        let stop_idx = p.steps.iter().position(|s| s.kind == MigrationStepKind::StopSource).unwrap();
        let create_idx = p.steps.iter().position(|s| s.kind == MigrationStepKind::CreateTarget).unwrap();
        assert!(stop_idx < create_idx);
    }

    #[test]
    fn create_then_stop_orders_create_before_stop() {
        let p = plan(MigrationStrategy::CreateThenStop);
        let stop_idx = p.steps.iter().position(|s| s.kind == MigrationStepKind::StopSource).unwrap();
        let create_idx = p.steps.iter().position(|s| s.kind == MigrationStepKind::CreateTarget).unwrap();
        assert!(create_idx < stop_idx);
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(MigrationPlanStatus::Completed.is_terminal());
        assert!(MigrationPlanStatus::Failed.is_terminal());
        assert!(MigrationPlanStatus::Cancelled.is_terminal());
        assert!(MigrationPlanStatus::TimedOut.is_terminal());
        assert!(!MigrationPlanStatus::InProgress.is_terminal());
    }
}

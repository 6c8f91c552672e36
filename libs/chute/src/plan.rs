//! The execution-plan graph for chute updates.
//!
//! Concern modules contribute `(priority, action, optional abort)` entries;
//! execution runs them in stable priority order, and a failure runs the
//! abort actions of everything already executed, in reverse.

use crate::context::AgentContext;
use crate::update::Update;
use crate::{Result, plans};

/// Plan priorities, low to high. Validation first, host resources next,
/// container runtime last; the cleanup band runs after the new container is
/// up (or as the forward path of delete).
pub mod phase {
    pub const VALIDATE_NAME: u32 = 10;
    pub const CHECK_STATE: u32 = 20;
    pub const STOP_RUNTIME: u32 = 25;
    pub const CREATE_FILES: u32 = 30;
    pub const RESOURCE_LIMITS: u32 = 40;
    pub const DETECT_DEVICES: u32 = 48;
    pub const ALLOCATE_NETWORK: u32 = 50;
    pub const SYNTH_TRAFFIC: u32 = 52;
    pub const WRITE_CONFIG: u32 = 55;
    pub const RELOAD_CONFIG: u32 = 60;
    pub const PREPARE_IMAGE: u32 = 70;
    pub const REPLACE_CONTAINER: u32 = 78;
    pub const CREATE_CONTAINER: u32 = 80;
    pub const START_CONTAINER: u32 = 90;
    pub const CONNECT_INTERFACES: u32 = 95;
    pub const CLEANUP_CONFIG: u32 = 100;
    pub const CLEANUP_RELOAD: u32 = 102;
    pub const CLEANUP_NETWORK: u32 = 104;
    pub const CLEANUP_IMAGE: u32 = 106;
    pub const CLEANUP_FILES: u32 = 108;
}

/// Which chute snapshot an action operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Old,
    New,
}

/// The closed set of operations a plan can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ValidateName,
    CheckState,
    CreateDataDirs,
    RemoveDataDirs,
    SetResourceLimits,
    DetectNetworkDevices,
    AllocateNetworks,
    ReleaseNetworks(Target),
    SynthesizeFirewall,
    WriteChuteConfig,
    RemoveChuteConfig,
    ReloadConfig,
    PrepareImage,
    RemoveImage(Target),
    CreateContainer,
    RemoveContainer(Target),
    StartContainer(Target),
    StopContainer(Target),
    SetupNetInterfaces(Target),
}

#[derive(Debug, Clone, Copy)]
pub struct PlanStep {
    pub priority: u32,
    pub action: Action,
    pub abort: Option<Action>,
}

/// Priority-indexed, append-ordered plan entries.
#[derive(Debug, Default)]
pub struct PlanMap {
    steps: Vec<PlanStep>,
}

impl PlanMap {
    pub fn register(&mut self, priority: u32, action: Action) {
        self.steps.push(PlanStep {
            priority,
            action,
            abort: None,
        });
    }

    pub fn register_with_abort(&mut self, priority: u32, action: Action, abort: Action) {
        self.steps.push(PlanStep {
            priority,
            action,
            abort: Some(abort),
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Indices in execution order: stable sort by priority, so entries at
    /// the same priority keep their registration order.
    fn execution_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.steps.len()).collect();
        order.sort_by_key(|i| self.steps[*i].priority);
        order
    }
}

/// Runs the update's plan. On failure the abort actions of already-executed
/// entries run in reverse order and the first error is recorded as the
/// update's failure.
pub(crate) async fn execute_plan(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let order = update.plan.execution_order();
    let mut executed: Vec<usize> = Vec::new();

    for index in order {
        let step = update.plan.steps[index];

        match plans::perform(step.action, update, ctx).await {
            Ok(()) => executed.push(index),
            Err(e) => {
                tracing::error!(update = %update, action = ?step.action, "Plan step failed: {e}");
                update.failure = Some(e.to_string());

                for done in executed.iter().rev() {
                    let Some(abort) = update.plan.steps[*done].abort else {
                        continue;
                    };
                    if let Err(abort_err) = plans::perform(abort, update, ctx).await {
                        tracing::warn!(
                            update = %update,
                            action = ?abort,
                            "Abort step failed: {abort_err}"
                        );
                    }
                }

                return Err(e);
            }
        }
    }

    Ok(())
}

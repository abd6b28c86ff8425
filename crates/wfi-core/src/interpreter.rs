//! C8: Interpreter.
//!
//! The top-level reducer: `apply_event` folds an acknowledged completion
//! into state; `next` drives the bounded selection loop that orchestrates
//! the loop kernel (C2), step selector (C4), context builder (C7), and
//! prompt materializer (C9) to find the next step to run or declare the
//! workflow complete.

use crate::artifact::{Artifact, ArtifactEvaluation, LoopControlDecision};
use crate::condition::evaluate;
use crate::context::{self, Context};
use crate::error::{Result, WorkflowError};
use crate::frame::{LoopContext, LoopFrame, LoopProgress, LoopStack};
use crate::kernel::{self, LoopDecision, LoopKernelPorts, LoopPosition};
use crate::model::{
    CompiledWorkflow, ConditionSource, CountSource, LoopConfig, LoopPath, LoopType, StepId, StepInstanceId,
};
use crate::prompt::{self, Guidance};
use crate::recovery;
use crate::selector::{self, Selection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Guards against a runaway state machine: see §5's 10 000-iteration bound.
const SELECTION_LOOP_GUARD: u32 = 10_000;

/// The persisted shape a caller hands back on every call.
#[derive(Debug, Clone, Default)]
pub enum ExecutionState {
    #[default]
    Init,
    Running {
        completed: Vec<StepInstanceId>,
        loop_stack: LoopStack,
        pending_step: Option<StepInstanceId>,
    },
    Complete,
}

impl ExecutionState {
    fn into_running(self) -> (Vec<StepInstanceId>, LoopStack, Option<StepInstanceId>) {
        match self {
            ExecutionState::Running { completed, loop_stack, pending_step } => {
                (completed, loop_stack, pending_step)
            }
            ExecutionState::Init => (Vec::new(), LoopStack::new(), None),
            ExecutionState::Complete => (Vec::new(), LoopStack::new(), None),
        }
    }
}

/// Wire-level event the interpreter accepts. Anything else is rejected
/// by `apply_event` rather than silently ignored, keeping the reducer total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StepCompleted { step_instance_id: StepInstanceId },
    #[serde(other)]
    Other,
}

/// `applyEvent(state, event) -> state`.
pub fn apply_event(state: ExecutionState, event: WorkflowEvent) -> Result<ExecutionState> {
    match state {
        ExecutionState::Complete => Ok(ExecutionState::Complete),
        ExecutionState::Init => apply_event(
            ExecutionState::Running { completed: Vec::new(), loop_stack: LoopStack::new(), pending_step: None },
            event,
        ),
        ExecutionState::Running { mut completed, loop_stack, pending_step } => {
            let Some(pending) = pending_step else {
                return Err(WorkflowError::InvalidState {
                    reason: "no pending step to acknowledge".into(),
                });
            };
            let WorkflowEvent::StepCompleted { step_instance_id } = event else {
                return Err(WorkflowError::InvalidState {
                    reason: "unrecognized event kind".into(),
                });
            };
            if step_instance_id != pending {
                return Err(WorkflowError::InvalidState {
                    reason: format!(
                        "event for `{}` does not match pending step `{}`",
                        step_instance_id.step_id, pending.step_id
                    ),
                });
            }
            completed.push(step_instance_id);
            Ok(ExecutionState::Running { completed, loop_stack, pending_step: None })
        }
    }
}

/// One materialized step plus the identity callers must echo back in
/// their `step_completed` event.
#[derive(Debug, Clone, PartialEq)]
pub struct NextStep {
    pub step_id: StepId,
    pub step_instance_id: StepInstanceId,
    pub guidance: Guidance,
}

/// Result of `next`: the (possibly advanced) state, the step to run if
/// any, and whether the workflow has finished.
#[derive(Debug, Clone)]
pub struct NextOutcome {
    pub state: ExecutionState,
    pub next: Option<NextStep>,
    pub is_complete: bool,
}

/// `next(compiled, state, context, artifacts) -> {state, next, isComplete}`.
pub fn next(workflow: &CompiledWorkflow, state: ExecutionState, context: &Context, artifacts: &[Artifact]) -> Result<NextOutcome> {
    if matches!(state, ExecutionState::Complete) {
        return Ok(NextOutcome { state: ExecutionState::Complete, next: None, is_complete: true });
    }

    let (mut completed, mut loop_stack, pending_step) = state.into_running();

    if let Some(pending) = pending_step {
        let guidance = prompt::materialize(workflow, &pending)?;
        let step_id = pending.step_id.clone();
        let next_step = NextStep { step_id, step_instance_id: pending.clone(), guidance };
        return Ok(NextOutcome {
            state: ExecutionState::Running { completed, loop_stack, pending_step: Some(pending) },
            next: Some(next_step),
            is_complete: false,
        });
    }

    let mut working_context = context.clone();
    tracing::debug!(workflow_steps = workflow.steps.len(), "entering selection loop");

    for _ in 0..SELECTION_LOOP_GUARD {
        if let Some(top) = loop_stack.top().cloned() {
            let compiled_loop = workflow
                .loop_def(&top.loop_id)
                .ok_or_else(|| WorkflowError::InvalidLoop { loop_id: top.loop_id.clone(), reason: "frame references an unknown loop".into() })?;
            let full_path = loop_stack.current_loop_path();
            let ports = BoundPorts {
                loop_id: &top.loop_id,
                loop_config: &compiled_loop.loop_config,
                condition_source: compiled_loop.condition_source.as_ref(),
                body_steps: &compiled_loop.body_steps,
                base_context: &working_context,
                artifacts,
                completed: &completed,
                workflow,
                full_path: &full_path,
            };
            let pos = LoopPosition {
                loop_id: &top.loop_id,
                iteration: top.iteration(),
                body_index: top.current_body_index(),
                body_len: top.body_len(),
                max_iterations: compiled_loop.loop_config.max_iterations,
            };
            let decision = kernel::decide(pos, &ports)?;
            tracing::trace!(loop_id = %top.loop_id, ?decision, "loop kernel decision");

            match decision {
                LoopDecision::ExecuteBodyStep { index } => {
                    let new_frame = top.with_index(index)?;
                    loop_stack.replace_top(new_frame)?;
                    let step_id = compiled_loop.body_steps[index].clone();
                    if let Some(nested_loop) = workflow.loop_def(&step_id) {
                        let frame = LoopFrame::create(step_id.clone(), LoopContext::default(), nested_loop.body_steps.clone(), 0)?;
                        loop_stack.push(frame);
                        continue;
                    }
                    let path = loop_stack.current_loop_path();
                    let instance = StepInstanceId::in_loop(step_id.clone(), path);
                    let guidance = prompt::materialize(workflow, &instance)?;
                    let next_step = NextStep { step_id, step_instance_id: instance.clone(), guidance };
                    return Ok(NextOutcome {
                        state: ExecutionState::Running { completed, loop_stack, pending_step: Some(instance) },
                        next: Some(next_step),
                        is_complete: false,
                    });
                }
                LoopDecision::AdvanceIteration { next_iteration } => {
                    let new_frame = top.enter_iteration(next_iteration)?;
                    let progress = LoopProgress::from(&new_frame.loop_context);
                    working_context = context::merge_loop_state(&working_context, &new_frame.loop_id, Value::from(&progress));

                    match context::check_size(&working_context) {
                        context::ContextSizeStatus::Exceeded { bytes } => {
                            let warning = format!(
                                "loop `{}` aborted: context size {bytes} bytes exceeded the ceiling",
                                new_frame.loop_id
                            );
                            tracing::debug!(loop_id = %new_frame.loop_id, bytes, "loop aborted: context size ceiling exceeded");
                            working_context = context::add_warnings(&working_context, "loop", &new_frame.loop_id, &[warning]);
                            loop_stack.pop();
                            let outer_path = loop_stack.current_loop_path();
                            completed.push(StepInstanceId::in_loop(new_frame.loop_id.clone(), outer_path));
                        }
                        context::ContextSizeStatus::Warning { bytes } => {
                            let warning = format!("loop `{}` context size {bytes} bytes is nearing the ceiling", new_frame.loop_id);
                            working_context = context::add_warnings(&working_context, "loop", &new_frame.loop_id, &[warning]);
                            loop_stack.replace_top(new_frame)?;
                        }
                        context::ContextSizeStatus::Ok => {
                            loop_stack.replace_top(new_frame)?;
                        }
                    }
                    continue;
                }
                LoopDecision::ExitLoop => {
                    loop_stack.pop();
                    let outer_path = loop_stack.current_loop_path();
                    tracing::debug!(loop_id = %top.loop_id, "loop exited");
                    completed.push(StepInstanceId::in_loop(top.loop_id.clone(), outer_path));
                    continue;
                }
            }
        }

        let completed_ids = flat_step_ids(&completed);
        match selector::select_top_level(workflow, &completed_ids, &working_context) {
            Selection::Step(step_id) => {
                if let Some(compiled_loop) = workflow.loop_def(&step_id) {
                    let frame = LoopFrame::create(step_id.clone(), LoopContext::default(), compiled_loop.body_steps.clone(), 0)?;
                    loop_stack.push(frame);
                    continue;
                }
                let instance = StepInstanceId::top_level(step_id.clone());
                let guidance = prompt::materialize(workflow, &instance)?;
                let next_step = NextStep { step_id, step_instance_id: instance.clone(), guidance };
                return Ok(NextOutcome {
                    state: ExecutionState::Running { completed, loop_stack, pending_step: Some(instance) },
                    next: Some(next_step),
                    is_complete: false,
                });
            }
            Selection::None { .. } => {
                return Ok(NextOutcome { state: ExecutionState::Complete, next: None, is_complete: true });
            }
        }
    }

    Err(WorkflowError::InvalidState { reason: "possible infinite loop".into() })
}

fn flat_step_ids(completed: &[StepInstanceId]) -> Vec<StepId> {
    completed.iter().map(|i| i.step_id.clone()).collect()
}

/// Rebuild a `Running` state from a flat completed-step-id history when the
/// caller has lost its loop stack (see C6). Exposed for hosts that persist
/// only the flat id list rather than the full `ExecutionState`.
pub fn resume_from_completed_ids(workflow: &CompiledWorkflow, mut completed_step_ids: Vec<StepId>, context: &Context) -> ExecutionState {
    let loop_stack = recovery::recover_loop_stack(workflow, &mut completed_step_ids, context);
    let completed = completed_step_ids.into_iter().map(StepInstanceId::top_level).collect();
    ExecutionState::Running { completed, loop_stack, pending_step: None }
}

/// Binds the loop kernel's two policy ports to this call's configuration,
/// context, artifacts, and completion history (§4.8.3).
struct BoundPorts<'a> {
    loop_id: &'a str,
    loop_config: &'a LoopConfig,
    condition_source: Option<&'a ConditionSource>,
    body_steps: &'a [StepId],
    base_context: &'a Context,
    artifacts: &'a [Artifact],
    completed: &'a [StepInstanceId],
    workflow: &'a CompiledWorkflow,
    full_path: &'a LoopPath,
}

impl LoopKernelPorts for BoundPorts<'_> {
    fn should_enter_iteration(&self, iteration: u32) -> Result<bool> {
        match self.loop_config.loop_type {
            LoopType::For => {
                let count = resolve_count(self.loop_id, &self.loop_config.count, self.base_context)?;
                Ok(iteration < count)
            }
            LoopType::ForEach => {
                let items_key = self.loop_config.items.as_ref().ok_or_else(|| WorkflowError::InvalidLoop {
                    loop_id: self.loop_id.to_string(),
                    reason: "`forEach` loop is missing `items`".into(),
                })?;
                match self.base_context.get(items_key) {
                    Some(Value::Array(items)) => Ok((iteration as usize) < items.len()),
                    _ => Err(WorkflowError::MissingContext { loop_id: self.loop_id.to_string(), variable: items_key.clone() }),
                }
            }
            LoopType::While | LoopType::Until => {
                let continues = self.evaluate_continuation(iteration)?;
                Ok(if self.loop_config.loop_type == LoopType::Until { !continues } else { continues })
            }
        }
    }

    fn is_body_index_eligible(&self, index: usize) -> Result<bool> {
        let step_id = &self.body_steps[index];
        let instance = StepInstanceId::in_loop(step_id.clone(), self.full_path.clone());
        if self.completed.contains(&instance) {
            return Ok(false);
        }
        let Some(resolved) = self.workflow.step(step_id) else {
            return Ok(false);
        };
        match &resolved.core().run_condition {
            None => Ok(true),
            Some(predicate) => {
                let iteration = self.full_path.last().map(|e| e.iteration).unwrap_or(0);
                let projected = context::project(self.loop_config, iteration, self.base_context);
                Ok(evaluate(predicate, &projected))
            }
        }
    }
}

impl BoundPorts<'_> {
    fn evaluate_continuation(&self, iteration: u32) -> Result<bool> {
        match self.condition_source {
            Some(ConditionSource::ArtifactContract { loop_id }) => match crate::artifact::evaluate(self.artifacts, loop_id) {
                ArtifactEvaluation::Found { decision } => Ok(decision == LoopControlDecision::Continue),
                ArtifactEvaluation::NotFound { .. } | ArtifactEvaluation::Invalid { .. } => Err(WorkflowError::MissingContext {
                    loop_id: self.loop_id.to_string(),
                    variable: "wr.loop_control artifact".into(),
                }),
            },
            Some(ConditionSource::ContextVariable { condition }) => {
                let projected = context::project(self.loop_config, iteration, self.base_context);
                Ok(evaluate(condition, &projected))
            }
            None => {
                let condition = self.loop_config.condition.as_ref().ok_or_else(|| WorkflowError::InvalidLoop {
                    loop_id: self.loop_id.to_string(),
                    reason: "`while`/`until` loop is missing `condition`".into(),
                })?;
                let projected = context::project(self.loop_config, iteration, self.base_context);
                Ok(evaluate(condition, &projected))
            }
        }
    }
}

fn resolve_count(loop_id: &str, count: &Option<CountSource>, context: &Context) -> Result<u32> {
    match count {
        None => Err(WorkflowError::InvalidLoop { loop_id: loop_id.to_string(), reason: "`for` loop is missing `count`".into() }),
        Some(CountSource::Literal(n)) => Ok(*n as u32),
        Some(CountSource::ContextKey(key)) => context
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .ok_or_else(|| WorkflowError::MissingContext { loop_id: loop_id.to_string(), variable: key.clone() }),
    }
}

//! C6: Loop Recovery.
//!
//! Reconstructs a loop frame from `(completedStepIds, context)` alone, for
//! callers that polled back in without the loop stack they were handed
//! previously. Recovers at most one loop per call; nested recovery is
//! rejected as future work.

use crate::context::Context;
use crate::frame::{LoopContext, LoopFrame, LoopStack};
use crate::model::{CompiledWorkflow, StepId};
use serde_json::Value;
use std::collections::HashSet;

/// Recover a loop stack of length 0 or 1 from flat completion history.
///
/// On success, the ids of the recovered loop's completed body steps are
/// removed from `completed_step_ids` so iteration accounting downstream
/// stays clean. Any failure to reconstruct is swallowed: recovery returns an
/// empty stack rather than propagating an error, since the caller can
/// always proceed from scratch.
pub fn recover_loop_stack(
    workflow: &CompiledWorkflow,
    completed_step_ids: &mut Vec<StepId>,
    context: &Context,
) -> LoopStack {
    if let Some(stack) = fast_path_from_context(workflow, context) {
        return stack;
    }

    // Kept as a flat, possibly-repeating list: the same body step id recurs
    // once per iteration it completed in, and that multiplicity is exactly
    // what the (c) even-split iteration estimate below divides by.
    let body_completions: Vec<StepId> = completed_step_ids
        .iter()
        .filter(|id| workflow.is_loop_body_step(id))
        .cloned()
        .collect();
    if body_completions.is_empty() {
        return LoopStack::new();
    }

    for loop_id in &workflow.steps {
        let Some(compiled_loop) = workflow.loop_def(loop_id) else {
            continue;
        };
        if completed_step_ids.iter().any(|id| id == loop_id) {
            continue;
        }
        let body_set: HashSet<&StepId> = compiled_loop.body_steps.iter().collect();
        let overlap: Vec<StepId> = body_completions
            .iter()
            .filter(|id| body_set.contains(id))
            .cloned()
            .collect();
        if overlap.is_empty() {
            continue;
        }

        if let Some(frame) = reconstruct_frame(workflow, loop_id, &overlap, completed_step_ids, context) {
            completed_step_ids.retain(|id| !compiled_loop.body_steps.contains(id));
            let mut stack = LoopStack::new();
            stack.push(frame);
            return stack;
        }
    }

    LoopStack::new()
}

fn reconstruct_frame(
    workflow: &CompiledWorkflow,
    loop_id: &str,
    overlap: &[StepId],
    completed_step_ids: &[StepId],
    context: &Context,
) -> Option<LoopFrame> {
    let compiled_loop = workflow.loop_def(loop_id)?;
    let iterations_completed = estimate_iterations_completed(workflow, loop_id, overlap.len(), context);
    let resume_index = resume_index_for(&compiled_loop.body_steps, completed_step_ids);

    let loop_context = LoopContext {
        iteration: iterations_completed,
        warnings: Vec::new(),
    };
    LoopFrame::create(
        loop_id.to_string(),
        loop_context,
        compiled_loop.body_steps.clone(),
        resume_index,
    )
    .map_err(|e| tracing::warn!(loop_id, error = %e, "loop recovery failed to rebuild frame; starting from scratch"))
    .ok()
}

/// Estimate the completed-iteration count for a recovered frame: (a) an
/// explicit iteration variable in context, if numeric and positive, (b) a
/// conservative estimate when any body step is conditional, (c) an even
/// split across body length.
fn estimate_iterations_completed(workflow: &CompiledWorkflow, loop_id: &str, overlap_len: usize, context: &Context) -> u32 {
    let compiled_loop = match workflow.loop_def(loop_id) {
        Some(l) => l,
        None => return 0,
    };

    if let Some(n) = workflow_context_hint(workflow, loop_id, context) {
        if n > 0 {
            return n - 1;
        }
    }

    let any_conditional = compiled_loop.body_steps.iter().any(|id| {
        workflow
            .step(id)
            .map(|s| s.core().run_condition.is_some())
            .unwrap_or(false)
    });

    if any_conditional {
        overlap_len.saturating_sub(1) as u32
    } else {
        let body_len = compiled_loop.body_steps.len().max(1);
        (overlap_len / body_len) as u32
    }
}

/// Reads the loop's iteration variable (`loopConfig.iterationVar`, default
/// `currentIteration`) out of the context passed to `recover_loop_stack`.
/// `None` when absent, not a number, or not a whole number.
fn workflow_context_hint(workflow: &CompiledWorkflow, loop_id: &str, context: &Context) -> Option<u32> {
    let compiled_loop = workflow.loop_def(loop_id)?;
    let value = context.get(compiled_loop.loop_config.iteration_var())?;
    let n = value.as_u64()?;
    u32::try_from(n).ok()
}

fn resume_index_for(body_steps: &[StepId], completed_step_ids: &[StepId]) -> usize {
    let mut resume = 0usize;
    for (i, id) in body_steps.iter().enumerate() {
        if completed_step_ids.iter().any(|c| c == id) {
            resume = i + 1;
        }
    }
    resume
}

/// Fast path: the caller persisted a loop stack snapshot inside the
/// context itself, under `_loopStack`. Only a single-frame snapshot is
/// honored, matching the single-loop recovery scope of this component.
fn fast_path_from_context(workflow: &CompiledWorkflow, context: &Context) -> Option<LoopStack> {
    let Value::Array(entries) = context.get("_loopStack")? else {
        return None;
    };
    if entries.is_empty() {
        return None;
    }
    let entry = entries.first()?;
    let loop_id = entry.get("loop_id")?.as_str()?;
    let iteration = entry.get("iteration")?.as_u64()? as u32;
    let body_index = entry.get("body_index")?.as_u64()? as usize;
    let compiled_loop = workflow.loop_def(loop_id)?;

    let frame = LoopFrame::create(
        loop_id.to_string(),
        LoopContext { iteration, warnings: Vec::new() },
        compiled_loop.body_steps.clone(),
        body_index,
    )
    .ok()?;
    let mut stack = LoopStack::new();
    stack.push(frame);
    Some(stack)
}

//! C4: Step Selector.
//!
//! Deterministic, total scan over top-level steps: the first uncompleted,
//! non-loop-body step whose `runCondition` holds (or has none) wins. Loop
//! steps themselves are selectable (the interpreter pushes a frame for
//! them); loop *body* steps are never selectable at top level.

use crate::condition::evaluate;
use crate::model::{CompiledWorkflow, StepId};
use serde_json::Value;
use std::collections::HashMap;

/// Why a conditional top-level step was skipped, for optional guidance.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedCondition {
    pub step_id: StepId,
    pub variable: String,
    pub expected: Value,
    pub current: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Step(StepId),
    None { blocked: Vec<BlockedCondition> },
}

/// Scan `workflow.steps` in declaration order for the first eligible step.
pub fn select_top_level(
    workflow: &CompiledWorkflow,
    completed: &[String],
    context: &HashMap<String, Value>,
) -> Selection {
    let mut blocked = Vec::new();

    for step_id in &workflow.steps {
        if workflow.is_loop_body_step(step_id) {
            continue;
        }
        if completed.iter().any(|c| c == step_id) {
            continue;
        }
        let Some(resolved) = workflow.step(step_id) else {
            continue;
        };
        match &resolved.core().run_condition {
            None => return Selection::Step(step_id.clone()),
            Some(predicate) => {
                if evaluate(predicate, context) {
                    return Selection::Step(step_id.clone());
                }
                if let Some(b) = describe_block(step_id, predicate, context) {
                    blocked.push(b);
                }
            }
        }
    }

    Selection::None { blocked }
}

/// Best-effort description of why a simple `{var, equals}` predicate
/// blocked a step, for the guidance-only result. Composite predicates
/// (`and`/`or`/`not`/`gt`/`lt`) are not unpacked here; the selector stays
/// silent on those rather than guessing.
fn describe_block(
    step_id: &str,
    predicate: &crate::model::Predicate,
    context: &HashMap<String, Value>,
) -> Option<BlockedCondition> {
    if let crate::model::Predicate::Equals { var, equals } = predicate {
        return Some(BlockedCondition {
            step_id: step_id.to_string(),
            variable: var.clone(),
            expected: equals.clone(),
            current: context.get(var).cloned(),
        });
    }
    None
}

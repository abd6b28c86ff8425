//! C10: Workflow Compiler (consumer view).
//!
//! Turns an already-parsed, in-memory list of [`StepDef`] into the indexed
//! [`CompiledWorkflow`] shape the interpreter consumes. There is no file I/O
//! and no JSON-Schema conformance checking here, only the structural
//! bookkeeping (duplicate ids, unresolved body references, self-referencing
//! loops, empty bodies) that would otherwise corrupt every downstream
//! component if left unchecked.

use crate::error::{Result, WorkflowError};
use crate::model::{
    CompiledLoop, CompiledWorkflow, LoopBody, LoopId, ResolvedStep, StepDef, StepId,
};
use std::collections::{HashMap, HashSet};

/// Compile a top-level, ordered list of step definitions.
pub fn compile(steps: Vec<StepDef>) -> Result<CompiledWorkflow> {
    let mut step_by_id: HashMap<StepId, ResolvedStep> = HashMap::new();
    let mut loop_body_step_ids: HashSet<StepId> = HashSet::new();
    let mut compiled_loops: HashMap<LoopId, CompiledLoop> = HashMap::new();
    let mut order: Vec<StepId> = Vec::new();

    for step in &steps {
        register_step(
            step,
            true,
            &mut step_by_id,
            &mut loop_body_step_ids,
            &mut compiled_loops,
            &mut order,
        )?;
    }

    Ok(CompiledWorkflow {
        steps: order,
        step_by_id,
        loop_body_step_ids,
        compiled_loops,
    })
}

fn register_step(
    step: &StepDef,
    top_level: bool,
    step_by_id: &mut HashMap<StepId, ResolvedStep>,
    loop_body_step_ids: &mut HashSet<StepId>,
    compiled_loops: &mut HashMap<LoopId, CompiledLoop>,
    order: &mut Vec<StepId>,
) -> Result<()> {
    let id = step.id().clone();
    if step_by_id.contains_key(&id) {
        return Err(WorkflowError::InvalidWorkflow {
            reason: format!("duplicate step id `{id}`"),
        });
    }

    let resolved = match step {
        StepDef::Plain(core) => ResolvedStep::Plain(core.clone()),
        StepDef::Loop(l) => ResolvedStep::Loop(l.core.clone()),
    };
    step_by_id.insert(id.clone(), resolved);
    if top_level {
        order.push(id.clone());
    } else {
        loop_body_step_ids.insert(id.clone());
    }

    if let StepDef::Loop(loop_def) = step {
        let body_steps = resolve_body(
            &id,
            &loop_def.body,
            step_by_id,
            loop_body_step_ids,
            compiled_loops,
            order,
        )?;
        if body_steps.is_empty() {
            return Err(WorkflowError::EmptyLoopBody { loop_id: id.clone() });
        }
        let condition_source = loop_def.loop_config.condition_source.clone();
        compiled_loops.insert(
            id.clone(),
            CompiledLoop {
                loop_config: loop_def.loop_config.clone(),
                body_steps,
                condition_source,
            },
        );
    }

    Ok(())
}

fn resolve_body(
    loop_id: &str,
    body: &LoopBody,
    step_by_id: &mut HashMap<StepId, ResolvedStep>,
    loop_body_step_ids: &mut HashSet<StepId>,
    compiled_loops: &mut HashMap<LoopId, CompiledLoop>,
    order: &mut Vec<StepId>,
) -> Result<Vec<StepId>> {
    match body {
        LoopBody::Ref(ref_id) => {
            reject_self_reference(loop_id, ref_id)?;
            if !step_by_id.contains_key(ref_id) {
                return Err(WorkflowError::LoopBodyResolution {
                    loop_id: loop_id.to_string(),
                    reason: format!("referenced step `{ref_id}` was not declared"),
                });
            }
            loop_body_step_ids.insert(ref_id.clone());
            Ok(vec![ref_id.clone()])
        }
        LoopBody::Inline(defs) => {
            let mut ids = Vec::with_capacity(defs.len());
            for def in defs {
                reject_self_reference(loop_id, def.id())?;
                register_step(def, false, step_by_id, loop_body_step_ids, compiled_loops, order)?;
                ids.push(def.id().clone());
            }
            Ok(ids)
        }
    }
}

fn reject_self_reference(loop_id: &str, candidate: &str) -> Result<()> {
    if candidate == loop_id {
        return Err(WorkflowError::InvalidWorkflow {
            reason: format!("loop `{loop_id}` body references itself"),
        });
    }
    Ok(())
}

//! C9: Prompt Materializer.
//!
//! Turns a resolved step plus its instance id into the text an agent
//! actually reads: agent-role preamble, guidance bullets, the step's own
//! prompt, then a loop-context footer when the instance sits inside a loop.

use crate::error::{Result, WorkflowError};
use crate::model::{CompiledWorkflow, ResolvedStep, StepInstanceId};

/// The materialized prompt and whether the caller must confirm before acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guidance {
    pub prompt: String,
    pub requires_confirmation: bool,
}

/// Materialize `instance`'s prompt against `workflow`. Loop steps are never
/// materialized directly; only their body steps are, once the kernel has
/// selected one. Attempting it here is `InvalidState`.
pub fn materialize(workflow: &CompiledWorkflow, instance: &StepInstanceId) -> Result<Guidance> {
    let resolved = workflow
        .step(&instance.step_id)
        .ok_or_else(|| WorkflowError::StepNotFound { step_id: instance.step_id.clone() })?;
    if matches!(resolved, ResolvedStep::Loop(_)) {
        return Err(WorkflowError::InvalidState {
            reason: format!("loop step `{}` cannot be materialized directly", instance.step_id),
        });
    }
    let core = resolved.core();

    let mut sections = Vec::new();
    if let Some(role) = &core.agent_role {
        sections.push(format!("## Agent Role Instructions\n{role}"));
    }
    if !core.guidance.is_empty() {
        let bullets: String = core.guidance.iter().map(|g| format!("- {g}")).collect::<Vec<_>>().join("\n");
        sections.push(format!("## Step Guidance\n{bullets}"));
    }
    sections.push(core.prompt.clone());
    if let Some(innermost) = instance.innermost_loop() {
        sections.push(format!(
            "## Loop Context\n- Loop: {}\n- Iteration: {}",
            innermost.loop_id,
            innermost.iteration + 1
        ));
    }

    Ok(Guidance {
        prompt: sections.join("\n\n"),
        requires_confirmation: core.require_confirmation,
    })
}

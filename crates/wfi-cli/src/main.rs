use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use wfi_core::{
    apply_event, compile, next, resume_from_completed_ids, Artifact, Context, ExecutionState, StepDef,
    StepInstanceId, WorkflowEvent,
};

#[derive(Parser, Debug)]
#[command(name = "wfi", version, about = "Workflow Interpreter CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Parse and pretty-print a workflow file (debug).
    Show {
        /// Path to a JSON workflow file: an array of step definitions.
        workflow: PathBuf,
    },
    /// Poll the interpreter once: materialize the next step, or report completion.
    Next {
        /// Path to a JSON workflow file.
        workflow: PathBuf,
        /// Path to a JSON context object. Defaults to an empty context.
        #[arg(long)]
        context: Option<PathBuf>,
        /// Path to the flat completed-step-id state file this run reads and updates.
        #[arg(long)]
        state: PathBuf,
        /// A completed step instance, as JSON. Repeatable; applied in order before polling.
        #[arg(long = "event", num_args = 0..)]
        events: Vec<String>,
        /// A loop-control artifact, as JSON. Repeatable; passed to this poll only.
        #[arg(long = "artifact", num_args = 0..)]
        artifacts: Vec<String>,
    },
}

/// The only state this CLI persists between invocations: the flat,
/// possibly-repeating completed-step-id history the interpreter's loop
/// recovery (C6) reconstructs a loop stack from. Avoids round-tripping the
/// interpreter's internal `ExecutionState` shape through a file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    completed_step_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StepResponse {
    step_id: String,
    step_instance_id: StepInstanceId,
    prompt: String,
    requires_confirmation: bool,
}

#[derive(Debug, Serialize)]
struct NextResponse {
    run_id: Uuid,
    is_complete: bool,
    step: Option<StepResponse>,
    completed_step_ids: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Show { workflow } => cmd_show(&workflow),
        Cmd::Next { workflow, context, state, events, artifacts } => {
            cmd_next(&workflow, context.as_deref(), &state, &events, &artifacts)
        }
    }
}

fn cmd_show(workflow: &PathBuf) -> Result<()> {
    let steps = load_workflow(workflow)?;
    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(())
}

fn cmd_next(
    workflow_path: &PathBuf,
    context_path: Option<&std::path::Path>,
    state_path: &PathBuf,
    events: &[String],
    artifacts: &[String],
) -> Result<()> {
    let run_id = Uuid::new_v4();
    tracing::info!(%run_id, workflow = %workflow_path.display(), "polling interpreter");

    let steps = load_workflow(workflow_path)?;
    let wf = compile(steps).context("compile workflow")?;
    let context = load_context(context_path)?;
    let persisted = load_state(state_path)?;

    let mut state = resume_from_completed_ids(&wf, persisted.completed_step_ids, &context);
    for raw in events {
        let step_instance_id: StepInstanceId =
            serde_json::from_str(raw).with_context(|| format!("parse --event `{raw}`"))?;
        state = apply_event(state, WorkflowEvent::StepCompleted { step_instance_id })
            .with_context(|| format!("apply event `{raw}`"))?;
    }

    let mut artifact_bundle = Vec::with_capacity(artifacts.len());
    for raw in artifacts {
        let artifact: Artifact = serde_json::from_str(raw).with_context(|| format!("parse --artifact `{raw}`"))?;
        artifact_bundle.push(artifact);
    }

    let ids_before = flat_completed_ids(&state);
    let outcome = next(&wf, state, &context, &artifact_bundle).context("advance interpreter")?;
    let completed_step_ids = match &outcome.state {
        ExecutionState::Complete => ids_before,
        _ => flat_completed_ids(&outcome.state),
    };

    fs::write(
        state_path,
        serde_json::to_vec_pretty(&PersistedState { completed_step_ids: completed_step_ids.clone() })?,
    )
    .with_context(|| format!("write {}", state_path.display()))?;

    let response = NextResponse {
        run_id,
        is_complete: outcome.is_complete,
        step: outcome.next.map(|s| StepResponse {
            step_id: s.step_id,
            step_instance_id: s.step_instance_id,
            prompt: s.guidance.prompt,
            requires_confirmation: s.guidance.requires_confirmation,
        }),
        completed_step_ids,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn flat_completed_ids(state: &ExecutionState) -> Vec<String> {
    match state {
        ExecutionState::Running { completed, .. } => completed.iter().map(|i| i.step_id.clone()).collect(),
        ExecutionState::Init | ExecutionState::Complete => Vec::new(),
    }
}

fn load_workflow(path: &PathBuf) -> Result<Vec<StepDef>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse workflow json {}", path.display()))
}

fn load_context(path: Option<&std::path::Path>) -> Result<Context> {
    match path {
        None => Ok(HashMap::new()),
        Some(p) => {
            let text = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parse context json {}", p.display()))
        }
    }
}

fn load_state(path: &PathBuf) -> Result<PersistedState> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).with_context(|| format!("parse state json {}", path.display())),
        Err(_) => Ok(PersistedState::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_a_linear_workflow_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("workflow.json");
        fs::write(
            &path,
            r#"[{"id":"a","title":"A","prompt":"do a"},{"id":"b","title":"B","prompt":"do b"}]"#,
        )
        .unwrap();
        let steps = load_workflow(&path).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].id(), "a");
    }

    #[test]
    fn missing_state_file_resolves_to_empty_history() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let persisted = load_state(&path).unwrap();
        assert!(persisted.completed_step_ids.is_empty());
    }
}

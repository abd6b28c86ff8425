//! C3: Loop Control Artifact Evaluator.
//!
//! Artifacts are opaque to the core except for one tagged record,
//! `wr.loop_control`, that carries the while/until continuation decision
//! for a loop whose `conditionSource` is `artifact_contract`. No context
//! fallback happens here; that policy belongs to the interpreter (C8).

use crate::model::LoopId;
use serde::{Deserialize, Serialize};

/// One artifact in the bundle the caller may pass to `next`. Non-matching
/// kinds are ignored by this evaluator; they exist for other collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Artifact {
    #[serde(rename = "wr.loop_control")]
    LoopControl {
        loop_id: LoopId,
        decision: LoopControlDecision,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopControlDecision {
    Continue,
    Stop,
}

/// Result of searching the artifact bundle for a given loop id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactEvaluation {
    Found { decision: LoopControlDecision },
    NotFound { reason: String },
    Invalid { reason: String },
}

/// Linear scan for the first `wr.loop_control` record matching `loop_id`.
pub fn evaluate(artifacts: &[Artifact], loop_id: &str) -> ArtifactEvaluation {
    for artifact in artifacts {
        if let Artifact::LoopControl { loop_id: id, decision, .. } = artifact {
            if id == loop_id {
                return ArtifactEvaluation::Found { decision: *decision };
            }
        }
    }
    ArtifactEvaluation::NotFound {
        reason: format!("no wr.loop_control artifact found for loop `{loop_id}`"),
    }
}

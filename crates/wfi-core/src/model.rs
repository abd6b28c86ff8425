//! Core data model: steps, loops, predicates, and the compiled workflow shape
//! the interpreter consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Opaque lowercase identifier, unique within a workflow.
pub type StepId = String;

/// A loop is identified by the step id of the loop step that owns it.
pub type LoopId = String;

/// One hop of a loop path: which loop, and which 0-based iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopPathEntry {
    pub loop_id: LoopId,
    pub iteration: u32,
}

/// Ordered outermost-to-innermost sequence of enclosing loops at the moment
/// a step instance was created.
pub type LoopPath = Vec<LoopPathEntry>;

/// `(stepId, loopPath)` — the identity of one materialization of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInstanceId {
    pub step_id: StepId,
    pub loop_path: LoopPath,
}

impl StepInstanceId {
    pub fn top_level(step_id: impl Into<StepId>) -> Self {
        Self {
            step_id: step_id.into(),
            loop_path: Vec::new(),
        }
    }

    pub fn in_loop(step_id: impl Into<StepId>, loop_path: LoopPath) -> Self {
        Self {
            step_id: step_id.into(),
            loop_path,
        }
    }

    /// Deterministic serialization used as the equality/hash key for
    /// `completed` membership checks. `serde_json` preserves struct field
    /// order and `Vec` element order, so this is stable for equal values.
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(self).expect("StepInstanceId always serializes")
    }

    /// The innermost loop this instance was created under, if any.
    pub fn innermost_loop(&self) -> Option<&LoopPathEntry> {
        self.loop_path.last()
    }
}

/// A tagged predicate tree evaluated against a context mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    And { and: Vec<Predicate> },
    Or { or: Vec<Predicate> },
    Not { not: Box<Predicate> },
    Equals { var: String, equals: Value },
    Gt { var: String, gt: Value },
    Lt { var: String, lt: Value },
}

/// Fields shared by every step, loop or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCore {
    pub id: StepId,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub guidance: Vec<String>,
    #[serde(default)]
    pub run_condition: Option<Predicate>,
    #[serde(default)]
    pub require_confirmation: bool,
}

/// `type` discriminator on the loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    While,
    Until,
    For,
    ForEach,
}

/// `count` may be given as a literal or looked up in the context at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountSource {
    Literal(u64),
    ContextKey(String),
}

/// Where the while/until continuation decision is read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSource {
    ArtifactContract { loop_id: LoopId },
    ContextVariable { condition: Predicate },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(rename = "type")]
    pub loop_type: LoopType,
    pub max_iterations: u32,
    #[serde(default)]
    pub condition: Option<Predicate>,
    #[serde(default)]
    pub count: Option<CountSource>,
    #[serde(default)]
    pub items: Option<String>,
    #[serde(default)]
    pub iteration_var: Option<String>,
    #[serde(default)]
    pub item_var: Option<String>,
    #[serde(default)]
    pub index_var: Option<String>,
    #[serde(default)]
    pub condition_source: Option<ConditionSource>,
}

impl LoopConfig {
    pub fn iteration_var(&self) -> &str {
        self.iteration_var.as_deref().unwrap_or("currentIteration")
    }

    pub fn item_var(&self) -> &str {
        self.item_var.as_deref().unwrap_or("currentItem")
    }

    pub fn index_var(&self) -> &str {
        self.index_var.as_deref().unwrap_or("currentIndex")
    }
}

/// A loop step's body: either a reference to another declared step id, or an
/// inline ordered sequence of steps owned by this loop alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopBody {
    Ref(StepId),
    Inline(Vec<StepDef>),
}

/// A declared step: either a plain prompt-bearing leaf, or a loop step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDef {
    Loop(LoopStepDef),
    Plain(StepCore),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStepDef {
    #[serde(flatten)]
    pub core: StepCore,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub body: LoopBody,
}

impl StepDef {
    pub fn id(&self) -> &StepId {
        match self {
            StepDef::Plain(s) => &s.id,
            StepDef::Loop(l) => &l.core.id,
        }
    }

    pub fn core(&self) -> &StepCore {
        match self {
            StepDef::Plain(s) => s,
            StepDef::Loop(l) => &l.core,
        }
    }

    pub fn as_loop(&self) -> Option<&LoopStepDef> {
        match self {
            StepDef::Loop(l) => Some(l),
            StepDef::Plain(_) => None,
        }
    }
}

/// A step as resolved inside a `CompiledWorkflow`: we keep only the core
/// fields plus a marker for whether this id names a loop, since the loop's
/// own configuration and body live in `compiled_loops` keyed by the same id.
#[derive(Debug, Clone)]
pub enum ResolvedStep {
    Plain(StepCore),
    Loop(StepCore),
}

impl ResolvedStep {
    pub fn core(&self) -> &StepCore {
        match self {
            ResolvedStep::Plain(c) | ResolvedStep::Loop(c) => c,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, ResolvedStep::Loop(_))
    }
}

/// A loop's pre-resolved shape: its configuration plus its ordered body
/// steps (inline bodies get synthesized ids folded into `step_by_id`).
#[derive(Debug, Clone)]
pub struct CompiledLoop {
    pub loop_config: LoopConfig,
    pub body_steps: Vec<StepId>,
    pub condition_source: Option<ConditionSource>,
}

/// The pre-computed shape the interpreter consumes. Produced by [`crate::compiler::compile`].
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// Top-level step ids, in declaration order.
    pub steps: Vec<StepId>,
    pub step_by_id: HashMap<StepId, ResolvedStep>,
    pub loop_body_step_ids: HashSet<StepId>,
    pub compiled_loops: HashMap<LoopId, CompiledLoop>,
}

impl CompiledWorkflow {
    pub fn step(&self, id: &str) -> Option<&ResolvedStep> {
        self.step_by_id.get(id)
    }

    pub fn loop_def(&self, loop_id: &str) -> Option<&CompiledLoop> {
        self.compiled_loops.get(loop_id)
    }

    pub fn is_loop_body_step(&self, id: &str) -> bool {
        self.loop_body_step_ids.contains(id)
    }
}

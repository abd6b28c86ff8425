//! C5: Loop Stack & Frames.
//!
//! A frame's identity (which loop, which body steps, where the body cursor
//! sits) is immutable once built; the only mutable cell in the whole data
//! model is `loop_context`, owned exclusively by its enclosing frame.
//! Index-changing operations therefore return a *new* frame rather than
//! mutating in place; replacing the stack's top slot is the one place a
//! frame gets swapped out.

use crate::error::{Result, WorkflowError};
use crate::model::{LoopId, StepId};
use serde_json::Value;

/// Mutable operational state owned by one loop frame.
#[derive(Debug, Clone, Default)]
pub struct LoopContext {
    pub iteration: u32,
    pub warnings: Vec<String>,
}

/// A single activation of a loop step on the loop stack.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub loop_id: LoopId,
    pub loop_context: LoopContext,
    body_steps: Vec<StepId>,
    current_body_index: usize,
}

/// Whether frame-invariant assertions run on the hot path. Disabled via
/// [`set_invariant_checks`] for callers that have already validated a
/// `CompiledWorkflow` once and want to skip re-checking it per frame.
static INVARIANT_CHECKS: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

pub fn set_invariant_checks(enabled: bool) {
    INVARIANT_CHECKS.store(enabled, std::sync::atomic::Ordering::Relaxed);
}

fn invariant_checks_enabled() -> bool {
    INVARIANT_CHECKS.load(std::sync::atomic::Ordering::Relaxed)
}

impl LoopFrame {
    /// Smart constructor: freezes `body_steps`, validates shape.
    pub fn create(
        loop_id: impl Into<LoopId>,
        loop_context: LoopContext,
        body_steps: Vec<StepId>,
        index: usize,
    ) -> Result<Self> {
        let loop_id = loop_id.into();
        if invariant_checks_enabled() {
            if body_steps.is_empty() {
                return Err(WorkflowError::EmptyLoopBody { loop_id });
            }
            if index > body_steps.len() {
                return Err(WorkflowError::LoopStackCorruption {
                    reason: format!(
                        "body index {index} out of range for loop `{loop_id}` with {} body steps",
                        body_steps.len()
                    ),
                });
            }
        }
        Ok(Self {
            loop_id,
            loop_context,
            body_steps,
            current_body_index: index,
        })
    }

    pub fn body_steps(&self) -> &[StepId] {
        &self.body_steps
    }

    pub fn body_len(&self) -> usize {
        self.body_steps.len()
    }

    pub fn current_body_index(&self) -> usize {
        self.current_body_index
    }

    pub fn iteration(&self) -> u32 {
        self.loop_context.iteration
    }

    /// Returns a new frame with the body cursor set to `index`.
    pub fn with_index(&self, index: usize) -> Result<Self> {
        Self::create(self.loop_id.clone(), self.loop_context.clone(), self.body_steps.clone(), index)
    }

    /// Returns a new frame with the body cursor advanced by one.
    pub fn advance(&self) -> Result<Self> {
        self.with_index(self.current_body_index + 1)
    }

    /// Returns a new frame with the body cursor reset to zero and the
    /// iteration counter bumped to `next_iteration`.
    pub fn enter_iteration(&self, next_iteration: u32) -> Result<Self> {
        let mut ctx = self.loop_context.clone();
        ctx.iteration = next_iteration;
        Self::create(self.loop_id.clone(), ctx, self.body_steps.clone(), 0)
    }

    pub fn with_warning(&self, warning: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.loop_context.warnings.push(warning.into());
        next
    }
}

/// A stack of loop frames, bottom (outermost) to top (innermost).
#[derive(Debug, Clone, Default)]
pub struct LoopStack {
    frames: Vec<LoopFrame>,
}

impl LoopStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&LoopFrame> {
        self.frames.last()
    }

    pub fn push(&mut self, frame: LoopFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<LoopFrame> {
        self.frames.pop()
    }

    /// Replace the top frame. Replacing an empty stack is a programmer
    /// error: the caller should have checked `is_empty()` first.
    pub fn replace_top(&mut self, frame: LoopFrame) -> Result<()> {
        if self.frames.is_empty() {
            return Err(WorkflowError::LoopStackCorruption {
                reason: "attempted to replace the top of an empty loop stack".into(),
            });
        }
        *self.frames.last_mut().expect("checked non-empty above") = frame;
        Ok(())
    }

    pub fn frames(&self) -> &[LoopFrame] {
        &self.frames
    }

    /// The current loop path: one entry per frame, outermost first, naming
    /// each frame's loop id and current iteration.
    pub fn current_loop_path(&self) -> Vec<crate::model::LoopPathEntry> {
        self.frames
            .iter()
            .map(|f| crate::model::LoopPathEntry {
                loop_id: f.loop_id.clone(),
                iteration: f.iteration(),
            })
            .collect()
    }
}

/// Opaque, serializable snapshot of loop-state progress stored into the
/// context under `_loopState[loopId]` by the context builder (C7).
#[derive(Debug, Clone)]
pub struct LoopProgress {
    pub iteration: u32,
    pub warnings: Vec<String>,
}

impl From<&LoopContext> for LoopProgress {
    fn from(ctx: &LoopContext) -> Self {
        Self {
            iteration: ctx.iteration,
            warnings: ctx.warnings.clone(),
        }
    }
}

impl From<&LoopProgress> for Value {
    fn from(p: &LoopProgress) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("iteration".into(), Value::from(p.iteration));
        map.insert(
            "warnings".into(),
            Value::Array(p.warnings.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: usize) -> LoopFrame {
        LoopFrame::create("L", LoopContext::default(), vec!["a".into(), "b".into()], index).unwrap()
    }

    #[test]
    fn create_rejects_empty_body() {
        let err = LoopFrame::create("L", LoopContext::default(), vec![], 0).unwrap_err();
        assert_eq!(err.code(), "EMPTY_LOOP_BODY");
    }

    #[test]
    fn create_rejects_out_of_range_index() {
        let err = LoopFrame::create("L", LoopContext::default(), vec!["a".into()], 2).unwrap_err();
        assert_eq!(err.code(), "LOOP_STACK_CORRUPTION");
    }

    #[test]
    fn advance_yields_new_frame_without_mutating_original() {
        let f = frame(0);
        let advanced = f.advance().unwrap();
        assert_eq!(f.current_body_index(), 0);
        assert_eq!(advanced.current_body_index(), 1);
    }

    #[test]
    fn enter_iteration_resets_index_and_bumps_iteration() {
        let f = frame(1);
        let next = f.enter_iteration(3).unwrap();
        assert_eq!(next.current_body_index(), 0);
        assert_eq!(next.iteration(), 3);
    }

    #[test]
    fn replace_top_on_empty_stack_is_corruption() {
        let mut stack = LoopStack::new();
        let err = stack.replace_top(frame(0)).unwrap_err();
        assert_eq!(err.code(), "LOOP_STACK_CORRUPTION");
    }

    #[test]
    fn current_loop_path_orders_outer_to_inner() {
        let mut stack = LoopStack::new();
        stack.push(LoopFrame::create("outer", LoopContext { iteration: 2, warnings: vec![] }, vec!["x".into()], 0).unwrap());
        stack.push(LoopFrame::create("inner", LoopContext { iteration: 1, warnings: vec![] }, vec!["y".into()], 0).unwrap());
        let path = stack.current_loop_path();
        assert_eq!(path[0].loop_id, "outer");
        assert_eq!(path[1].loop_id, "inner");
        assert_eq!(path[1].iteration, 1);
    }
}

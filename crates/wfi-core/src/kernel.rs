//! C2: Loop Kernel.
//!
//! The arithmetic/ordering core of loop execution, isolated from how
//! continuation conditions or body eligibility are actually evaluated (that
//! policy lives behind the two [`LoopKernelPorts`] methods, bound by the
//! interpreter in `interpreter.rs`). Centralizing this keeps iteration
//! bounds and body-scanning order from drifting between call sites.

use crate::error::{Result, WorkflowError};

/// What the kernel wants the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    ExecuteBodyStep { index: usize },
    AdvanceIteration { next_iteration: u32 },
    ExitLoop,
}

/// The two policy questions the kernel cannot answer on its own.
pub trait LoopKernelPorts {
    /// Should the loop enter (or remain in) iteration `iteration`?
    fn should_enter_iteration(&self, iteration: u32) -> Result<bool>;
    /// Is the body step at `index` eligible to run this iteration?
    fn is_body_index_eligible(&self, index: usize) -> Result<bool>;
}

/// The purely-arithmetic slice of a loop's current position.
#[derive(Debug, Clone, Copy)]
pub struct LoopPosition<'a> {
    pub loop_id: &'a str,
    pub iteration: u32,
    pub body_index: usize,
    pub body_len: usize,
    pub max_iterations: u32,
}

fn corrupt(loop_id: &str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::LoopStackCorruption {
        reason: format!("loop `{loop_id}`: {}", reason.into()),
    }
}

/// Decide the next kernel action for one loop, given its current position
/// and the two evaluation ports.
pub fn decide(pos: LoopPosition<'_>, ports: &dyn LoopKernelPorts) -> Result<LoopDecision> {
    validate_shape(&pos)?;

    if pos.iteration >= pos.max_iterations {
        return Err(corrupt(
            pos.loop_id,
            format!(
                "re-entered at iteration {} with max_iterations {}",
                pos.iteration, pos.max_iterations
            ),
        ));
    }

    if !ports.should_enter_iteration(pos.iteration)? {
        return Ok(LoopDecision::ExitLoop);
    }

    for i in pos.body_index..pos.body_len {
        if ports.is_body_index_eligible(i)? {
            return Ok(LoopDecision::ExecuteBodyStep { index: i });
        }
    }

    let next = pos.iteration + 1;
    if next >= pos.max_iterations {
        return Ok(LoopDecision::ExitLoop);
    }
    if !ports.should_enter_iteration(next)? {
        return Ok(LoopDecision::ExitLoop);
    }
    Ok(LoopDecision::AdvanceIteration { next_iteration: next })
}

fn validate_shape(pos: &LoopPosition<'_>) -> Result<()> {
    if pos.body_len == 0 {
        return Err(WorkflowError::EmptyLoopBody {
            loop_id: pos.loop_id.to_string(),
        });
    }
    if pos.body_index > pos.body_len {
        return Err(corrupt(
            pos.loop_id,
            format!("body_index {} exceeds body_len {}", pos.body_index, pos.body_len),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakePorts {
        enter: RefCell<Vec<bool>>,
        eligible: Vec<bool>,
    }

    impl LoopKernelPorts for FakePorts {
        fn should_enter_iteration(&self, _iteration: u32) -> Result<bool> {
            let mut e = self.enter.borrow_mut();
            Ok(if e.is_empty() { true } else { e.remove(0) })
        }
        fn is_body_index_eligible(&self, index: usize) -> Result<bool> {
            Ok(self.eligible.get(index).copied().unwrap_or(false))
        }
    }

    fn pos(iteration: u32, body_index: usize, body_len: usize, max_iterations: u32) -> LoopPosition<'static> {
        LoopPosition { loop_id: "L", iteration, body_index, body_len, max_iterations }
    }

    #[test]
    fn executes_first_eligible_body_step() {
        let ports = FakePorts { enter: RefCell::new(vec![]), eligible: vec![false, true, true] };
        let d = decide(pos(0, 0, 3, 5), &ports).unwrap();
        assert_eq!(d, LoopDecision::ExecuteBodyStep { index: 1 });
    }

    #[test]
    fn exits_when_should_enter_iteration_is_false() {
        let ports = FakePorts { enter: RefCell::new(vec![false]), eligible: vec![true] };
        let d = decide(pos(0, 0, 1, 5), &ports).unwrap();
        assert_eq!(d, LoopDecision::ExitLoop);
    }

    #[test]
    fn advances_when_body_exhausted_and_more_iterations_allowed() {
        let ports = FakePorts { enter: RefCell::new(vec![true, true]), eligible: vec![false] };
        let d = decide(pos(0, 1, 1, 5), &ports).unwrap();
        assert_eq!(d, LoopDecision::AdvanceIteration { next_iteration: 1 });
    }

    #[test]
    fn exits_on_natural_termination_at_max_iterations() {
        let ports = FakePorts { enter: RefCell::new(vec![true]), eligible: vec![false] };
        let d = decide(pos(2, 1, 1, 3), &ports).unwrap();
        assert_eq!(d, LoopDecision::ExitLoop);
    }

    #[test]
    fn rejects_reentry_at_or_past_max_iterations() {
        let ports = FakePorts { enter: RefCell::new(vec![]), eligible: vec![] };
        let err = decide(pos(3, 0, 1, 3), &ports).unwrap_err();
        assert_eq!(err.code(), "LOOP_STACK_CORRUPTION");
    }

    #[test]
    fn rejects_body_index_past_body_len() {
        let ports = FakePorts { enter: RefCell::new(vec![]), eligible: vec![] };
        let err = decide(pos(0, 4, 3, 5), &ports).unwrap_err();
        assert_eq!(err.code(), "LOOP_STACK_CORRUPTION");
    }

    #[test]
    fn rejects_zero_length_body() {
        let ports = FakePorts { enter: RefCell::new(vec![]), eligible: vec![] };
        let err = decide(pos(0, 0, 0, 5), &ports).unwrap_err();
        assert_eq!(err.code(), "EMPTY_LOOP_BODY");
    }

    #[test]
    fn skipped_iteration_still_advances_and_counts() {
        // All body steps ineligible at iteration 0, kernel should advance to 1.
        let ports = FakePorts { enter: RefCell::new(vec![true, true]), eligible: vec![false, false] };
        let d = decide(pos(0, 0, 2, 5), &ports).unwrap();
        assert_eq!(d, LoopDecision::AdvanceIteration { next_iteration: 1 });
    }
}

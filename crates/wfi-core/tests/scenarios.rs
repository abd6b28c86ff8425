//! End-to-end scenarios against the public API only, complementing the
//! colocated unit tests that exercise each collaborator in isolation.

use std::collections::HashMap;
use wfi_core::{
    apply_event, compile, next, resume_from_completed_ids, Artifact, ConditionSource, Context, CountSource,
    ExecutionState, LoopBody, LoopConfig, LoopStepDef, LoopType, StepCore, StepDef, StepInstanceId, WorkflowEvent,
};

fn plain(id: &str) -> StepDef {
    StepDef::Plain(StepCore {
        id: id.into(),
        title: id.into(),
        prompt: format!("do {id}"),
        agent_role: None,
        guidance: vec![],
        run_condition: None,
        require_confirmation: false,
    })
}

fn completed(instance: StepInstanceId) -> WorkflowEvent {
    WorkflowEvent::StepCompleted { step_instance_id: instance }
}

mod linear_workflow {
    use super::*;

    #[test]
    fn walks_three_plain_steps_to_completion() {
        let wf = compile(vec![plain("a"), plain("b"), plain("c")]).unwrap();
        let ctx: Context = HashMap::new();
        let mut state = ExecutionState::Init;
        let mut order = Vec::new();

        loop {
            let out = next(&wf, state, &ctx, &[]).unwrap();
            let Some(step) = out.next else {
                assert!(out.is_complete);
                break;
            };
            order.push(step.step_id.clone());
            state = apply_event(out.state, completed(step.step_instance_id)).unwrap();
        }

        assert_eq!(order, vec!["a", "b", "c"]);
    }
}

mod loop_execution {
    use super::*;

    fn for_loop(id: &str, body: Vec<StepDef>, count: u64) -> StepDef {
        StepDef::Loop(LoopStepDef {
            core: StepCore {
                id: id.into(),
                title: id.into(),
                prompt: "loop".into(),
                agent_role: None,
                guidance: vec![],
                run_condition: None,
                require_confirmation: false,
            },
            loop_config: LoopConfig {
                loop_type: LoopType::For,
                max_iterations: count as u32,
                condition: None,
                count: Some(CountSource::Literal(count)),
                items: None,
                iteration_var: None,
                item_var: None,
                index_var: None,
                condition_source: None,
            },
            body: LoopBody::Inline(body),
        })
    }

    #[test]
    fn runs_a_fixed_count_loop_then_finishes() {
        let wf = compile(vec![for_loop("review", vec![plain("check")], 3)]).unwrap();
        let ctx: Context = HashMap::new();
        let mut state = ExecutionState::Init;
        let mut iterations = Vec::new();

        loop {
            let out = next(&wf, state, &ctx, &[]).unwrap();
            let Some(step) = out.next else {
                assert!(out.is_complete);
                break;
            };
            iterations.push(step.step_instance_id.innermost_loop().unwrap().iteration);
            state = apply_event(out.state, completed(step.step_instance_id)).unwrap();
        }

        assert_eq!(iterations, vec![0, 1, 2]);
    }

    #[test]
    fn artifact_driven_while_loop_stops_on_artifact_decision() {
        use wfi_core::LoopControlDecision;

        let loop_step = StepDef::Loop(LoopStepDef {
            core: StepCore {
                id: "poll".into(),
                title: "poll".into(),
                prompt: "loop".into(),
                agent_role: None,
                guidance: vec![],
                run_condition: None,
                require_confirmation: false,
            },
            loop_config: LoopConfig {
                loop_type: LoopType::While,
                max_iterations: 4,
                condition: None,
                count: None,
                items: None,
                iteration_var: None,
                item_var: None,
                index_var: None,
                condition_source: Some(ConditionSource::ArtifactContract { loop_id: "poll".into() }),
            },
            body: LoopBody::Inline(vec![plain("check_status")]),
        });
        let wf = compile(vec![loop_step]).unwrap();
        let ctx: Context = HashMap::new();

        let continue_artifact = [Artifact::LoopControl {
            loop_id: "poll".into(),
            decision: LoopControlDecision::Continue,
            metadata: None,
        }];
        let stop_artifact = [Artifact::LoopControl {
            loop_id: "poll".into(),
            decision: LoopControlDecision::Stop,
            metadata: None,
        }];

        let out = next(&wf, ExecutionState::Init, &ctx, &continue_artifact).unwrap();
        let step = out.next.unwrap();
        assert_eq!(step.step_id, "check_status");
        let state = apply_event(out.state, completed(step.step_instance_id)).unwrap();

        let out = next(&wf, state, &ctx, &stop_artifact).unwrap();
        assert!(out.is_complete);
    }
}

mod nested_loops {
    use super::*;

    fn for_loop(id: &str, body: Vec<StepDef>, count: u64) -> StepDef {
        StepDef::Loop(LoopStepDef {
            core: StepCore {
                id: id.into(),
                title: id.into(),
                prompt: "loop".into(),
                agent_role: None,
                guidance: vec![],
                run_condition: None,
                require_confirmation: false,
            },
            loop_config: LoopConfig {
                loop_type: LoopType::For,
                max_iterations: count as u32,
                condition: None,
                count: Some(CountSource::Literal(count)),
                items: None,
                iteration_var: None,
                item_var: None,
                index_var: None,
                condition_source: None,
            },
            body: LoopBody::Inline(body),
        })
    }

    #[test]
    fn runs_a_loop_nested_inside_a_loop_body_to_completion() {
        let inner = for_loop("inner", vec![plain("x")], 2);
        let outer = for_loop("outer", vec![inner], 2);
        let wf = compile(vec![outer]).unwrap();
        let ctx: Context = HashMap::new();
        let mut state = ExecutionState::Init;
        let mut visits = Vec::new();

        loop {
            let out = next(&wf, state, &ctx, &[]).unwrap();
            let Some(step) = out.next else {
                assert!(out.is_complete);
                break;
            };
            let path = step.step_instance_id.loop_path.clone();
            let iterations: Vec<u32> = path.iter().map(|entry| entry.iteration).collect();
            visits.push((step.step_id.clone(), iterations));
            state = apply_event(out.state, completed(step.step_instance_id)).unwrap();
        }

        assert_eq!(
            visits,
            vec![
                ("x".to_string(), vec![0, 0]),
                ("x".to_string(), vec![0, 1]),
                ("x".to_string(), vec![1, 0]),
                ("x".to_string(), vec![1, 1]),
            ]
        );
    }
}

mod recovery_from_flat_history {
    use super::*;

    fn for_loop(id: &str, body_ids: &[&str], max_iterations: u32) -> StepDef {
        StepDef::Loop(LoopStepDef {
            core: StepCore {
                id: id.into(),
                title: id.into(),
                prompt: "loop".into(),
                agent_role: None,
                guidance: vec![],
                run_condition: None,
                require_confirmation: false,
            },
            loop_config: LoopConfig {
                loop_type: LoopType::For,
                max_iterations,
                condition: None,
                count: Some(CountSource::Literal(max_iterations as u64)),
                items: None,
                iteration_var: None,
                item_var: None,
                index_var: None,
                condition_source: None,
            },
            body: LoopBody::Inline(body_ids.iter().map(|id| plain(id)).collect()),
        })
    }

    #[test]
    fn resumes_mid_iteration_at_the_next_uncompleted_body_step() {
        let wf = compile(vec![for_loop("draft", &["write", "critique"], 3)]).unwrap();
        let ctx: Context = HashMap::new();

        // Caller persisted only a flat history: the first body step of the
        // first iteration completed, the second has not.
        let history = vec!["write".to_string()];
        let state = resume_from_completed_ids(&wf, history, &ctx);

        let out = next(&wf, state, &ctx, &[]).unwrap();
        let step = out.next.unwrap();
        assert_eq!(step.step_id, "critique");
        assert_eq!(step.step_instance_id.innermost_loop().unwrap().iteration, 0);
    }
}

//! C7: Context Builder.
//!
//! Produces the projected context body steps see and prompts render
//! against: injects the loop's iteration/item/index variables, folds loop
//! progress and warnings back into the context, and enforces a size bound
//! so a runaway loop can't grow the context without limit.

use crate::model::{LoopConfig, LoopId, LoopType};
use serde_json::Value;
use std::collections::HashMap;

pub type Context = HashMap<String, Value>;

/// 256 KiB ceiling on the serialized context size.
pub const CONTEXT_SIZE_CEILING_BYTES: usize = 256 * 1024;
/// Warn once the context crosses 80% of the ceiling.
pub const CONTEXT_SIZE_WARNING_BYTES: usize = CONTEXT_SIZE_CEILING_BYTES * 4 / 5;

/// Project `base` for one body-step evaluation at `iteration`: sets the
/// loop's iteration variable (1-based for display) and, for `forEach`
/// loops, the current item and index variables.
pub fn project(loop_config: &LoopConfig, iteration: u32, base: &Context) -> Context {
    let mut ctx = base.clone();
    ctx.insert(
        loop_config.iteration_var().to_string(),
        Value::from(iteration + 1),
    );

    if loop_config.loop_type == LoopType::ForEach {
        if let Some(items_key) = &loop_config.items {
            if let Some(Value::Array(items)) = base.get(items_key) {
                if let Some(item) = items.get(iteration as usize) {
                    ctx.insert(loop_config.item_var().to_string(), item.clone());
                }
                ctx.insert(loop_config.index_var().to_string(), Value::from(iteration));
            }
        }
    }

    ctx
}

/// Insert or update a loop's progress record at `_loopState[loop_id]`.
pub fn merge_loop_state(ctx: &Context, loop_id: &LoopId, state: Value) -> Context {
    let mut next = ctx.clone();
    let mut loop_state = match next.remove("_loopState") {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    loop_state.insert(loop_id.clone(), state);
    next.insert("_loopState".to_string(), Value::Object(loop_state));
    next
}

/// Append `warnings` to `_warnings[category][key]`.
pub fn add_warnings(ctx: &Context, category: &str, key: &str, warnings: &[String]) -> Context {
    if warnings.is_empty() {
        return ctx.clone();
    }
    let mut next = ctx.clone();
    let mut all_categories = match next.remove("_warnings") {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let mut category_map = match all_categories.remove(category) {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let mut existing = match category_map.remove(key) {
        Some(Value::Array(arr)) => arr,
        _ => Vec::new(),
    };
    existing.extend(warnings.iter().cloned().map(Value::String));
    category_map.insert(key.to_string(), Value::Array(existing));
    all_categories.insert(category.to_string(), Value::Object(category_map));
    next.insert("_warnings".to_string(), Value::Object(all_categories));
    next
}

/// Outcome of a context-size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSizeStatus {
    Ok,
    Warning { bytes: usize },
    Exceeded { bytes: usize },
}

/// Estimate the serialized size of the context and classify it against the
/// fixed 256 KiB ceiling / 80% warning threshold.
pub fn check_size(ctx: &Context) -> ContextSizeStatus {
    let bytes = estimate_bytes(ctx);
    if bytes >= CONTEXT_SIZE_CEILING_BYTES {
        ContextSizeStatus::Exceeded { bytes }
    } else if bytes >= CONTEXT_SIZE_WARNING_BYTES {
        ContextSizeStatus::Warning { bytes }
    } else {
        ContextSizeStatus::Ok
    }
}

fn estimate_bytes(ctx: &Context) -> usize {
    // `serde_json::Value` is a tree (no back-references possible), so a
    // cycle-safe visited set is unnecessary for this representation; we
    // still bound the walk by construction (serialization itself is
    // recursive-but-finite) rather than implementing a separate byte
    // estimator, matching the "simpler bound" alternative the design notes
    // explicitly allow in place of a heuristic walker.
    ctx.iter()
        .map(|(k, v)| k.len() + serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CountSource;
    use serde_json::json;

    fn for_each_config() -> LoopConfig {
        LoopConfig {
            loop_type: LoopType::ForEach,
            max_iterations: 10,
            condition: None,
            count: None,
            items: Some("xs".into()),
            iteration_var: None,
            item_var: None,
            index_var: None,
            condition_source: None,
        }
    }

    #[test]
    fn projects_iteration_as_one_based() {
        let cfg = LoopConfig {
            loop_type: LoopType::For,
            max_iterations: 3,
            condition: None,
            count: Some(CountSource::Literal(3)),
            items: None,
            iteration_var: None,
            item_var: None,
            index_var: None,
            condition_source: None,
        };
        let base: Context = HashMap::new();
        let projected = project(&cfg, 0, &base);
        assert_eq!(projected.get("currentIteration"), Some(&json!(1)));
    }

    #[test]
    fn projects_for_each_item_and_index() {
        let cfg = for_each_config();
        let mut base: Context = HashMap::new();
        base.insert("xs".into(), json!(["a", "b"]));
        let projected = project(&cfg, 1, &base);
        assert_eq!(projected.get("currentItem"), Some(&json!("b")));
        assert_eq!(projected.get("currentIndex"), Some(&json!(1)));
    }

    #[test]
    fn merge_loop_state_is_additive_across_loops() {
        let base: Context = HashMap::new();
        let ctx1 = merge_loop_state(&base, &"L1".to_string(), json!({"iteration": 1}));
        let ctx2 = merge_loop_state(&ctx1, &"L2".to_string(), json!({"iteration": 0}));
        let loop_state = ctx2.get("_loopState").unwrap();
        assert_eq!(loop_state["L1"]["iteration"], json!(1));
        assert_eq!(loop_state["L2"]["iteration"], json!(0));
    }

    #[test]
    fn add_warnings_accumulates_under_category_and_key() {
        let base: Context = HashMap::new();
        let ctx1 = add_warnings(&base, "loop", "L", &["first".into()]);
        let ctx2 = add_warnings(&ctx1, "loop", "L", &["second".into()]);
        let warnings = &ctx2.get("_warnings").unwrap()["loop"]["L"];
        assert_eq!(warnings, &json!(["first", "second"]));
    }

    #[test]
    fn check_size_flags_warning_and_exceeded() {
        let mut small: Context = HashMap::new();
        small.insert("a".into(), json!("x"));
        assert_eq!(check_size(&small), ContextSizeStatus::Ok);

        let mut big: Context = HashMap::new();
        big.insert("blob".into(), json!("x".repeat(CONTEXT_SIZE_WARNING_BYTES)));
        assert!(matches!(check_size(&big), ContextSizeStatus::Warning { .. }));

        let mut huge: Context = HashMap::new();
        huge.insert("blob".into(), json!("x".repeat(CONTEXT_SIZE_CEILING_BYTES)));
        assert!(matches!(check_size(&huge), ContextSizeStatus::Exceeded { .. }));
    }
}

//! Graph validation: spec.md §4.2.
//!
//! All checks are fatal; `validate_nodes` accumulates every violation it
//! finds rather than stopping at the first; so a graph author sees every
//! problem with one build attempt instead of a stream of one-at-a-time
//! rejections.

use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::graph::Node;

const MIN_HEARTBEAT_INTERVAL_SECS: i64 = 30;

pub fn validate_nodes(nodes: &[Node]) -> Result<(), CoreError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.name()) {
            errors.push(CoreError::DuplicateNode(node.name().to_string()));
        }
    }

    let known: HashSet<&str> = nodes.iter().map(Node::name).collect();

    for node in nodes {
        let Some(step) = node.as_step() else { continue };

        for referenced in step.gated_by.referenced_nodes() {
            if !known.contains(referenced) {
                errors.push(CoreError::UnknownReference {
                    from: step.name.clone(),
                    to: referenced.to_string(),
                });
            }
        }

        if let Some(target) = &step.mutates {
            if target == &step.name || !known.contains(target.as_str()) {
                errors.push(CoreError::InvalidMutationTarget {
                    node: step.name.clone(),
                    target: target.clone(),
                });
            } else if step.update_revision_on_change
                && step.gated_by.referenced_nodes().contains(&target.as_str())
            {
                errors.push(CoreError::MutationCycle {
                    node: step.name.clone(),
                    target: target.clone(),
                });
            }
        }

        if step.heartbeat_interval_seconds < MIN_HEARTBEAT_INTERVAL_SECS
            || step.heartbeat_interval_seconds * 2 > step.heartbeat_timeout_seconds
        {
            errors.push(CoreError::InvalidHeartbeatConfig {
                node: step.name.clone(),
                interval: step.heartbeat_interval_seconds,
                timeout: step.heartbeat_timeout_seconds,
            });
        }
    }

    if let Some(cycle) = find_cycle(nodes) {
        errors.push(CoreError::Cycle { path: cycle });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Multiple(errors))
    }
}

/// DFS three-color cycle detection over the dependency edges induced by
/// each step's `gated_by` (upstream -> step). Returns the first cycle found,
/// traced as a path of node names.
fn find_cycle(nodes: &[Node]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut deps: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        deps.entry(node.name()).or_default();
        if let Some(step) = node.as_step() {
            for upstream in step.gated_by.referenced_nodes() {
                deps.entry(upstream).or_default().push(node.name());
            }
        }
    }

    let mut color: HashMap<&str, Color> = nodes.iter().map(|n| (n.name(), Color::White)).collect();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        color: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(node, Color::Gray);
        stack.push(node);

        if let Some(children) = deps.get(node) {
            for &child in children {
                match color.get(child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        if let Some(cycle) = visit(child, deps, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|&n| n == child).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                        path.push(child.to_string());
                        return Some(path);
                    }
                    Color::Black => {}
                }
            }
        }

        stack.pop();
        color.insert(node, Color::Black);
        None
    }

    for node in nodes {
        if color.get(node.name()).copied() == Some(Color::White) {
            if let Some(cycle) = visit(node.name(), &deps, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Gate;
    use crate::graph::{ComputeArgs, ComputeFn, Node, StepNode};
    use crate::value::NodeType;
    use std::sync::Arc;

    fn ok_fn() -> Arc<dyn ComputeFn> {
        Arc::new(|_args: ComputeArgs| async move { Ok(serde_json::json!("ok")) })
    }

    fn step(name: &str, gated_by: Gate, mutates: Option<&str>, update_rev: bool) -> Node {
        Node::Step(StepNode {
            name: name.to_string(),
            kind: NodeType::Compute,
            gated_by,
            f_compute: ok_fn(),
            f_on_save: None,
            mutates: mutates.map(String::from),
            update_revision_on_change: update_rev,
            max_retries: 3,
            abandon_after_seconds: 300,
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 90,
        })
    }

    #[test]
    fn detects_unknown_reference() {
        let nodes = vec![step("a", Gate::all_provided(["ghost"]), None, false)];
        let err = validate_nodes(&nodes).unwrap_err();
        let CoreError::Multiple(errs) = err else { panic!() };
        assert!(errs.iter().any(|e| matches!(e, CoreError::UnknownReference { .. })));
    }

    #[test]
    fn detects_self_mutation() {
        let nodes = vec![step("a", Gate::And(vec![]), Some("a"), false)];
        let err = validate_nodes(&nodes).unwrap_err();
        let CoreError::Multiple(errs) = err else { panic!() };
        assert!(errs.iter().any(|e| matches!(e, CoreError::InvalidMutationTarget { .. })));
    }

    #[test]
    fn detects_mutation_revision_cycle() {
        let nodes = vec![
            Node::Input { name: "switch".into() },
            step("paw", Gate::all_provided(["switch"]), Some("switch"), true),
        ];
        let err = validate_nodes(&nodes).unwrap_err();
        let CoreError::Multiple(errs) = err else { panic!() };
        assert!(errs.iter().any(|e| matches!(e, CoreError::MutationCycle { .. })));
    }

    #[test]
    fn allows_mutation_without_revision_bump() {
        let nodes = vec![
            Node::Input { name: "switch".into() },
            step("paw", Gate::all_provided(["switch"]), Some("switch"), false),
        ];
        assert!(validate_nodes(&nodes).is_ok());
    }

    #[test]
    fn detects_cycles() {
        let nodes = vec![
            step("a", Gate::all_provided(["b"]), None, false),
            step("b", Gate::all_provided(["a"]), None, false),
        ];
        let err = validate_nodes(&nodes).unwrap_err();
        let CoreError::Multiple(errs) = err else { panic!() };
        assert!(errs.iter().any(|e| matches!(e, CoreError::Cycle { .. })));
    }

    #[test]
    fn rejects_heartbeat_interval_too_small() {
        let mut nodes = vec![step("a", Gate::And(vec![]), None, false)];
        if let Node::Step(s) = &mut nodes[0] {
            s.heartbeat_interval_seconds = 5;
        }
        let err = validate_nodes(&nodes).unwrap_err();
        let CoreError::Multiple(errs) = err else { panic!() };
        assert!(errs.iter().any(|e| matches!(e, CoreError::InvalidHeartbeatConfig { .. })));
    }

    #[test]
    fn rejects_heartbeat_interval_over_half_timeout() {
        let mut nodes = vec![step("a", Gate::And(vec![]), None, false)];
        if let Node::Step(s) = &mut nodes[0] {
            s.heartbeat_interval_seconds = 60;
            s.heartbeat_timeout_seconds = 90;
        }
        let err = validate_nodes(&nodes).unwrap_err();
        let CoreError::Multiple(errs) = err else { panic!() };
        assert!(errs.iter().any(|e| matches!(e, CoreError::InvalidHeartbeatConfig { .. })));
    }

    #[test]
    fn zero_upstreams_validates() {
        let nodes = vec![step("a", Gate::And(vec![]), None, false)];
        assert!(validate_nodes(&nodes).is_ok());
    }
}

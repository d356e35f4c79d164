//! Graph and node model.
//!
//! A [`Graph`] is an immutable, in-process description of a computation
//! graph: its nodes, their dependency gates, and the user functions that
//! compute them. Graphs are built once via [`GraphBuilder`], validated, and
//! registered with a [`crate::catalog::Catalog`]; they are never mutated
//! after that (spec.md §4.2's "mutation-safety checks" exist precisely to
//! keep it that way).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::gate::Gate;
use crate::validate;
use crate::value::NodeType;

/// Outcome of a user compute function: `{:ok, v}` or `{:error, reason}` in
/// the source material's terms.
pub type ComputeOutcome = std::result::Result<serde_json::Value, String>;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Arguments handed to a node's compute function: the current values of
/// every upstream node named in its `gated_by`, plus the execution's
/// per-node metadata map (set alongside the last `set_input`/`set_inputs`
/// call for each referenced node).
#[derive(Debug, Clone, Default)]
pub struct ComputeArgs {
    pub values: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// User compute function. Async, fallible, and free to block arbitrarily —
/// the engine tolerates this via the heartbeat protocol (spec.md §5), not by
/// forbidding it.
pub trait ComputeFn: Send + Sync {
    fn call(&self, args: ComputeArgs) -> BoxFuture<ComputeOutcome>;
}

impl<F, Fut> ComputeFn for F
where
    F: Fn(ComputeArgs) -> Fut + Send + Sync,
    Fut: Future<Output = ComputeOutcome> + Send + 'static,
{
    fn call(&self, args: ComputeArgs) -> BoxFuture<ComputeOutcome> {
        Box::pin(self(args))
    }
}

/// Best-effort callback invoked after a computation's result is durably
/// persisted. Failures are logged, never surfaced to the computation's
/// persisted state (spec.md §4.6).
pub trait OnSaveFn: Send + Sync {
    fn call(&self, node: &str, value: &serde_json::Value) -> BoxFuture<std::result::Result<(), String>>;
}

impl<F, Fut> OnSaveFn for F
where
    F: Fn(&str, &serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
{
    fn call(&self, node: &str, value: &serde_json::Value) -> BoxFuture<std::result::Result<(), String>> {
        Box::pin(self(node, value))
    }
}

/// A non-input node's full configuration (spec.md §4.2's `Step`).
#[derive(Clone)]
pub struct StepNode {
    pub name: String,
    pub kind: NodeType,
    pub gated_by: Gate,
    pub f_compute: Arc<dyn ComputeFn>,
    pub f_on_save: Option<Arc<dyn OnSaveFn>>,
    /// Target node name for `mutate` nodes. `None` for every other kind.
    pub mutates: Option<String>,
    pub update_revision_on_change: bool,
    pub max_retries: u32,
    pub abandon_after_seconds: i64,
    pub heartbeat_interval_seconds: i64,
    pub heartbeat_timeout_seconds: i64,
}

impl std::fmt::Debug for StepNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepNode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("gated_by", &self.gated_by)
            .field("mutates", &self.mutates)
            .field("update_revision_on_change", &self.update_revision_on_change)
            .field("max_retries", &self.max_retries)
            .field("abandon_after_seconds", &self.abandon_after_seconds)
            .field("heartbeat_interval_seconds", &self.heartbeat_interval_seconds)
            .field("heartbeat_timeout_seconds", &self.heartbeat_timeout_seconds)
            .finish()
    }
}

/// A node in the graph: either a caller-supplied input, or a computed step.
#[derive(Debug)]
pub enum Node {
    Input { name: String },
    Step(StepNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Input { name } => name,
            Node::Step(step) => &step.name,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Input { .. } => NodeType::Input,
            Node::Step(step) => step.kind,
        }
    }

    pub fn as_step(&self) -> Option<&StepNode> {
        match self {
            Node::Input { .. } => None,
            Node::Step(step) => Some(step),
        }
    }
}

/// An immutable, content-hashed computation graph.
pub struct Graph {
    pub name: String,
    pub version: u32,
    pub hash: String,
    pub nodes: Vec<Node>,
    pub on_save: Option<Arc<dyn OnSaveFn>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("hash", &self.hash)
            .field("nodes", &self.nodes.iter().map(Node::name).collect::<Vec<_>>())
            .finish()
    }
}

impl Graph {
    /// Build and validate a graph. Returns every validation failure found
    /// (spec.md §4.2 enumerates them) rather than stopping at the first.
    pub fn build(
        name: impl Into<String>,
        version: u32,
        nodes: Vec<Node>,
        on_save: Option<Arc<dyn OnSaveFn>>,
    ) -> Result<Graph> {
        let name = name.into();
        validate::validate_nodes(&nodes)?;
        let hash = content_hash(&name, version, &nodes);
        Ok(Graph { name, version, hash, nodes, on_save })
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(Node::name)
    }

    pub fn step_nodes(&self) -> impl Iterator<Item = &StepNode> {
        self.nodes.iter().filter_map(Node::as_step)
    }
}

/// Stable content hash over the sorted node list and dependency specs, used
/// for execution-time drift detection (spec.md §3: `graph_hash`).
fn content_hash(name: &str, version: u32, nodes: &[Node]) -> String {
    let mut names: Vec<&Node> = nodes.iter().collect();
    names.sort_by_key(|n| n.name().to_string());

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(version.to_le_bytes());
    for node in names {
        hasher.update(node.name().as_bytes());
        hasher.update([node.node_type() as u8]);
        if let Some(step) = node.as_step() {
            for ref_node in step.gated_by.referenced_nodes() {
                hasher.update(ref_node.as_bytes());
            }
            if let Some(target) = &step.mutates {
                hasher.update(target.as_bytes());
            }
            hasher.update([step.update_revision_on_change as u8]);
            hasher.update(step.max_retries.to_le_bytes());
            hasher.update(step.abandon_after_seconds.to_le_bytes());
            hasher.update(step.heartbeat_interval_seconds.to_le_bytes());
            hasher.update(step.heartbeat_timeout_seconds.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Gate;

    fn ok_fn() -> Arc<dyn ComputeFn> {
        Arc::new(|_args: ComputeArgs| async move { Ok(serde_json::json!("ok")) })
    }

    fn step(name: &str, gated_by: Gate) -> Node {
        Node::Step(StepNode {
            name: name.to_string(),
            kind: NodeType::Compute,
            gated_by,
            f_compute: ok_fn(),
            f_on_save: None,
            mutates: None,
            update_revision_on_change: false,
            max_retries: 3,
            abandon_after_seconds: 300,
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 90,
        })
    }

    #[test]
    fn builds_a_valid_linear_graph() {
        let nodes = vec![
            Node::Input { name: "name".into() },
            step("greet", Gate::all_provided(["name"])),
        ];
        let graph = Graph::build("greeting", 1, nodes, None).unwrap();
        assert_eq!(graph.node_names().count(), 2);
        assert!(!graph.hash.is_empty());
    }

    #[test]
    fn hash_is_stable_across_node_ordering() {
        let nodes_a = vec![
            Node::Input { name: "x".into() },
            Node::Input { name: "y".into() },
            step("sum", Gate::all_provided(["x", "y"])),
        ];
        let nodes_b = vec![
            Node::Input { name: "y".into() },
            step("sum", Gate::all_provided(["x", "y"])),
            Node::Input { name: "x".into() },
        ];
        let a = Graph::build("g", 1, nodes_a, None).unwrap();
        let b = Graph::build("g", 1, nodes_b, None).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn hash_changes_when_dependency_spec_changes() {
        let nodes_a = vec![
            Node::Input { name: "x".into() },
            step("sum", Gate::all_provided(["x"])),
        ];
        let nodes_b = vec![
            Node::Input { name: "x".into() },
            Node::Input { name: "y".into() },
            step("sum", Gate::all_provided(["x", "y"])),
        ];
        let a = Graph::build("g", 1, nodes_a, None).unwrap();
        let b = Graph::build("g", 1, nodes_b, None).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn rejects_duplicate_node_names() {
        let nodes = vec![
            Node::Input { name: "x".into() },
            Node::Input { name: "x".into() },
        ];
        let err = Graph::build("g", 1, nodes, None).unwrap_err();
        match err {
            CoreError::Multiple(errs) => {
                assert!(errs.iter().any(|e| matches!(e, CoreError::DuplicateNode(_))));
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}

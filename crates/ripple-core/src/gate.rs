//! Predicate trees ("gates") and the readiness evaluator.
//!
//! A [`Gate`] decides whether a computation's upstream dependencies are
//! satisfied. Leaves evaluate a named predicate against a snapshot of one
//! upstream value; `And`/`Or`/`Not` combine them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::value::NodeType;

/// Read-only view of one upstream value at the moment a gate is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct ValueSnapshot<'a> {
    pub node_name: &'a str,
    pub node_type: NodeType,
    pub node_value: &'a serde_json::Value,
    pub set_time: Option<i64>,
    /// Current wall-clock time (epoch seconds), as observed by the caller.
    /// Threaded through rather than read from the clock so evaluation is
    /// deterministic and testable.
    pub now: i64,
}

/// A predicate over a single upstream value.
pub type PredicateFn = Arc<dyn Fn(&ValueSnapshot<'_>) -> bool + Send + Sync>;

/// Named, cloneable predicate. The name participates in the graph content
/// hash and in "what am I waiting for" diagnostics.
#[derive(Clone)]
pub struct Predicate {
    pub name: String,
    pub f: PredicateFn,
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

impl Predicate {
    pub fn new(name: impl Into<String>, f: impl Fn(&ValueSnapshot<'_>) -> bool + Send + Sync + 'static) -> Self {
        Self { name: name.into(), f: Arc::new(f) }
    }

    fn eval(&self, snapshot: &ValueSnapshot<'_>) -> bool {
        (self.f)(snapshot)
    }
}

/// `provided?` — true iff the value has been set, with the schedule-node
/// wrinkle from spec.md §4.2: schedule nodes (`tick_once`/`tick_recurring`)
/// additionally require their pulse (`node_value`) to have already elapsed.
pub fn provided() -> Predicate {
    Predicate::new("provided?", |snap| {
        let Some(_set_time) = snap.set_time else {
            return false;
        };
        if snap.node_type.is_schedule() {
            match snap.node_value.as_i64() {
                Some(pulse) => pulse <= snap.now,
                None => false,
            }
        } else {
            true
        }
    })
}

/// `true?` — true iff the value is set and equals JSON `true`.
pub fn true_() -> Predicate {
    Predicate::new("true?", |snap| snap.node_value.as_bool() == Some(true))
}

/// `false?` — true iff the value is set and equals JSON `false`.
pub fn false_() -> Predicate {
    Predicate::new("false?", |snap| snap.node_value.as_bool() == Some(false))
}

/// A predicate tree gating a computation's eligibility.
#[derive(Debug, Clone)]
pub enum Gate {
    Leaf { node: String, predicate: Predicate },
    And(Vec<Gate>),
    Or(Vec<Gate>),
    Not(Box<Gate>),
}

impl Gate {
    /// Sugar for a flat list of upstream names, each gated on `provided?`.
    pub fn all_provided<I, S>(names: I) -> Gate
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Gate::And(
            names
                .into_iter()
                .map(|n| Gate::Leaf { node: n.into(), predicate: provided() })
                .collect(),
        )
    }

    pub fn leaf(node: impl Into<String>, predicate: Predicate) -> Gate {
        Gate::Leaf { node: node.into(), predicate }
    }

    /// Every node name referenced anywhere in this gate tree, for
    /// validation (unknown-reference checks) and dependency-edge
    /// construction (cycle detection).
    pub fn referenced_nodes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_referenced_nodes(&mut out);
        out
    }

    fn collect_referenced_nodes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Gate::Leaf { node, .. } => out.push(node.as_str()),
            Gate::And(children) | Gate::Or(children) => {
                for c in children {
                    c.collect_referenced_nodes(out);
                }
            }
            Gate::Not(inner) => inner.collect_referenced_nodes(out),
        }
    }
}

/// Result of evaluating a [`Gate`] against a value snapshot: whether it's
/// ready, plus which leaves were met/unmet for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub conditions_met: Vec<String>,
    pub conditions_not_met: Vec<String>,
}

/// Evaluate `gate` against `values`, keyed by node name.
///
/// A leaf referencing a node name absent from `values` is a programming
/// error per spec.md §4.4 and is surfaced as [`CoreError::MissingValueNode`]
/// rather than silently treated as unmet, so callers can fail loudly instead
/// of scheduling on bad graph wiring.
pub fn evaluate(gate: &Gate, values: &HashMap<String, ValueSnapshot<'_>>) -> Result<Readiness> {
    let mut met = Vec::new();
    let mut not_met = Vec::new();
    let ready = eval_inner(gate, values, &mut met, &mut not_met)?;
    Ok(Readiness { ready, conditions_met: met, conditions_not_met: not_met })
}

fn eval_inner(
    gate: &Gate,
    values: &HashMap<String, ValueSnapshot<'_>>,
    met: &mut Vec<String>,
    not_met: &mut Vec<String>,
) -> Result<bool> {
    match gate {
        Gate::Leaf { node, predicate } => {
            let snapshot = values
                .get(node)
                .ok_or_else(|| CoreError::MissingValueNode(node.clone()))?;
            let ok = predicate.eval(snapshot);
            let label = format!("{node}:{}", predicate.name);
            if ok {
                met.push(label);
            } else {
                not_met.push(label);
            }
            Ok(ok)
        }
        Gate::And(children) => {
            let mut all = true;
            for c in children {
                let ok = eval_inner(c, values, met, not_met)?;
                all &= ok;
            }
            Ok(all)
        }
        Gate::Or(children) => {
            let mut any = false;
            for c in children {
                let ok = eval_inner(c, values, met, not_met)?;
                any |= ok;
            }
            Ok(any)
        }
        Gate::Not(inner) => {
            // Not() wraps a single leaf per spec.md's grammar; evaluate it
            // without polluting the met/not_met diagnostics of the inverted
            // condition (the inversion is the thing that matters here).
            let mut scratch_met = Vec::new();
            let mut scratch_not_met = Vec::new();
            let inner_ok = eval_inner(inner, values, &mut scratch_met, &mut scratch_not_met)?;
            let ok = !inner_ok;
            if ok {
                met.extend(scratch_not_met);
            } else {
                not_met.extend(scratch_met);
            }
            Ok(ok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap<'a>(node_value: &'a serde_json::Value, set_time: Option<i64>) -> ValueSnapshot<'a> {
        ValueSnapshot {
            node_name: "n",
            node_type: NodeType::Compute,
            node_value,
            set_time,
            now: 1000,
        }
    }

    #[test]
    fn provided_requires_set_time() {
        let v = serde_json::json!(null);
        assert!(!provided().eval(&snap(&v, None)));
        assert!(provided().eval(&snap(&v, Some(1))));
    }

    #[test]
    fn provided_on_schedule_node_requires_elapsed_pulse() {
        let future = serde_json::json!(5000);
        let past = serde_json::json!(1);
        let mut s = snap(&future, Some(1));
        s.node_type = NodeType::TickRecurring;
        assert!(!provided().eval(&s));
        let mut s2 = snap(&past, Some(1));
        s2.node_type = NodeType::TickRecurring;
        assert!(provided().eval(&s2));
    }

    #[test]
    fn and_or_not_compose() {
        let mut values = HashMap::new();
        let v_true = serde_json::json!(true);
        let v_false = serde_json::json!(false);
        values.insert(
            "a".to_string(),
            ValueSnapshot { node_name: "a", node_type: NodeType::Compute, node_value: &v_true, set_time: Some(1), now: 10 },
        );
        values.insert(
            "b".to_string(),
            ValueSnapshot { node_name: "b", node_type: NodeType::Compute, node_value: &v_false, set_time: Some(1), now: 10 },
        );

        let gate = Gate::And(vec![
            Gate::leaf("a", true_()),
            Gate::Not(Box::new(Gate::leaf("b", true_()))),
        ]);
        let readiness = evaluate(&gate, &values).unwrap();
        assert!(readiness.ready);

        let gate2 = Gate::Or(vec![Gate::leaf("a", false_()), Gate::leaf("b", false_())]);
        let readiness2 = evaluate(&gate2, &values).unwrap();
        assert!(readiness2.ready);
    }

    #[test]
    fn missing_value_node_is_an_error() {
        let values: HashMap<String, ValueSnapshot<'_>> = HashMap::new();
        let gate = Gate::leaf("missing", provided());
        let err = evaluate(&gate, &values).unwrap_err();
        assert!(matches!(err, CoreError::MissingValueNode(ref n) if n == "missing"));
    }

    #[test]
    fn zero_upstreams_is_vacuously_ready() {
        let values: HashMap<String, ValueSnapshot<'_>> = HashMap::new();
        let gate = Gate::And(vec![]);
        let readiness = evaluate(&gate, &values).unwrap();
        assert!(readiness.ready);
    }
}

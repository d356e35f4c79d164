//! Process-local, concurrency-safe registry of graphs (spec.md §4.1).
//!
//! The catalog is immutable from the perspective of any in-flight `advance`:
//! a graph is registered once and looked up by `(name, version)` from then
//! on. There is no hidden mutable global — callers own a `Catalog` and pass
//! it explicitly, per the "no hidden mutable globals" guidance in spec.md §9.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, Result};
use crate::graph::Graph;

type Key = (String, u32);

#[derive(Default)]
pub struct Catalog {
    graphs: RwLock<HashMap<Key, Arc<Graph>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self { graphs: RwLock::new(HashMap::new()) }
    }

    /// Register a graph, replacing any prior registration at the same
    /// `(name, version)`. Re-registration is expected during redeploys; the
    /// caller is responsible for not registering a graph whose semantics
    /// changed under an unchanged version (drift is detected per-execution
    /// via `graph_hash`, not prevented here).
    pub fn register(&self, graph: Graph) -> Arc<Graph> {
        let arc = Arc::new(graph);
        let key = (arc.name.clone(), arc.version);
        if self.graphs.read().contains_key(&key) {
            tracing::info!(graph = %key.0, version = key.1, "replacing existing graph registration");
        }
        self.graphs.write().insert(key, arc.clone());
        arc
    }

    pub fn fetch(&self, name: &str, version: u32) -> Option<Arc<Graph>> {
        self.graphs.read().get(&(name.to_string(), version)).cloned()
    }

    /// List registered graphs. `name` alone lists every version of that
    /// graph, newest first. Requesting a `version` without a `name` is a
    /// usage error (spec.md §4.1).
    pub fn list(&self, name: Option<&str>, version: Option<u32>) -> Result<Vec<Arc<Graph>>> {
        if name.is_none() && version.is_some() {
            return Err(CoreError::VersionWithoutName);
        }
        let graphs = self.graphs.read();
        let mut matches: Vec<Arc<Graph>> = graphs
            .values()
            .filter(|g| name.map_or(true, |n| g.name == n))
            .filter(|g| version.map_or(true, |v| g.version == v))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.name.cmp(&b.name)));
        Ok(matches)
    }

    pub fn unregister(&self, name: &str, version: u32) -> Option<Arc<Graph>> {
        self.graphs.write().remove(&(name.to_string(), version))
    }
}

//! Service dependency graph.
//!
//! Loaded from `service_dependencies.yaml`, validated to be a DAG with no
//! dangling references, and published as an immutable snapshot behind an
//! [`arc_swap::ArcSwap`] so hot reloads never expose a half-loaded graph.
//! Used by confidence scoring (upstream boost), blast radius (dependents,
//! criticality), and prerequisite evaluation.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::error::PipelineError;

/// Service tier, tier-0 being the most critical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "tier-0")]
    Tier0,
    #[serde(rename = "tier-1")]
    Tier1,
    #[serde(rename = "tier-2")]
    Tier2,
    #[serde(rename = "tier-3")]
    Tier3,
}

/// Business criticality of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

impl Criticality {
    /// Weight used by blast-radius scoring and risk adjustment.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Medium => 0.5,
            Self::High => 0.75,
            Self::Critical => 1.0,
        }
    }
}

/// One node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNode {
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub tier: Tier,
    pub team: String,
    pub criticality: Criticality,
}

/// Immutable, validated dependency graph snapshot.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, ServiceNode>,
    /// Reverse edges: service -> services that depend on it directly.
    dependents: HashMap<String, Vec<String>>,
    /// md5 of the canonical serialized form; byte-identical input yields an
    /// identical hash.
    snapshot_hash: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl DependencyGraph {
    /// Parse and validate a YAML document of `service -> node` entries.
    ///
    /// Rejects cycles, references to unknown services, and unknown enum
    /// values (the latter via serde).
    pub fn from_yaml_str(raw: &str) -> Result<Self, PipelineError> {
        let nodes: BTreeMap<String, ServiceNode> = serde_yaml::from_str(raw)
            .map_err(|e| PipelineError::Configuration(format!("service_dependencies: {e}")))?;
        Self::from_nodes(nodes, raw)
    }

    /// Load from a file path.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "service_dependencies: cannot read {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&raw)
    }

    fn from_nodes(
        nodes: BTreeMap<String, ServiceNode>,
        raw: &str,
    ) -> Result<Self, PipelineError> {
        // Every referenced service must exist.
        for (name, node) in &nodes {
            for dep in &node.depends_on {
                if !nodes.contains_key(dep) {
                    return Err(PipelineError::Configuration(format!(
                        "service_dependencies: {name} depends on unknown service {dep}"
                    )));
                }
            }
        }

        // Cycle check: iterative DFS, three colors.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: HashMap<&str, Color> =
            nodes.keys().map(|k| (k.as_str(), Color::White)).collect();
        for start in nodes.keys() {
            if color[start.as_str()] != Color::White {
                continue;
            }
            // (node, next child index)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            color.insert(start.as_str(), Color::Gray);
            while let Some((current, child_idx)) = stack.pop() {
                let deps = &nodes[current].depends_on;
                if child_idx < deps.len() {
                    stack.push((current, child_idx + 1));
                    let child = deps[child_idx].as_str();
                    match color[child] {
                        Color::Gray => {
                            return Err(PipelineError::Configuration(format!(
                                "service_dependencies: dependency cycle through {child}"
                            )));
                        }
                        Color::White => {
                            color.insert(child, Color::Gray);
                            stack.push((child, 0));
                        }
                        Color::Black => {}
                    }
                } else {
                    color.insert(current, Color::Black);
                }
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (name, node) in &nodes {
            for dep in &node.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(name.clone());
            }
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        Ok(Self {
            nodes,
            dependents,
            snapshot_hash: format!("{:x}", md5::compute(raw.as_bytes())),
            loaded_at: chrono::Utc::now(),
        })
    }

    pub fn snapshot_hash(&self) -> &str {
        &self.snapshot_hash
    }

    pub fn contains(&self, service: &str) -> bool {
        self.nodes.contains_key(service)
    }

    pub fn node(&self, service: &str) -> Option<&ServiceNode> {
        self.nodes.get(service)
    }

    /// All services, sorted.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Criticality weight, defaulting to medium for unknown services.
    pub fn criticality_weight(&self, service: &str) -> f64 {
        self.nodes
            .get(service)
            .map_or(Criticality::Medium.weight(), |n| n.criticality.weight())
    }

    /// Services this one calls directly.
    pub fn direct_upstreams(&self, service: &str) -> &[String] {
        self.nodes
            .get(service)
            .map_or(&[] as &[String], |n| n.depends_on.as_slice())
    }

    /// All services reachable through `depends_on`, excluding the direct ones
    /// and the service itself.
    pub fn transitive_upstreams(&self, service: &str) -> HashSet<String> {
        let direct: HashSet<&str> = self
            .direct_upstreams(service)
            .iter()
            .map(String::as_str)
            .collect();
        let mut all = self.reach(service, |s| self.direct_upstreams(s).to_vec());
        all.retain(|s| !direct.contains(s.as_str()));
        all
    }

    /// Services that depend on this one directly.
    pub fn direct_dependents(&self, service: &str) -> &[String] {
        self.dependents
            .get(service)
            .map_or(&[] as &[String], Vec::as_slice)
    }

    /// All transitive dependents (the blast-radius "downstream" set).
    pub fn transitive_dependents(&self, service: &str) -> HashSet<String> {
        self.reach(service, |s| self.direct_dependents(s).to_vec())
    }

    fn reach(&self, start: &str, next: impl Fn(&str) -> Vec<String>) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = next(start).into_iter().collect();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current.clone()) {
                queue.extend(next(&current));
            }
        }
        seen.remove(start);
        seen
    }

    /// Compact description of a service's surroundings for reasoning prompts.
    pub fn neighborhood_summary(&self, service: &str) -> String {
        let upstream = self.direct_upstreams(service).join(", ");
        let downstream = self.direct_dependents(service).join(", ");
        let node = self.nodes.get(service);
        format!(
            "service={service} tier={} criticality={} upstream=[{}] downstream=[{}]",
            node.map_or("unknown".to_string(), |n| {
                serde_yaml::to_string(&n.tier)
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            }),
            node.map_or("unknown".to_string(), |n| format!("{:?}", n.criticality)
                .to_lowercase()),
            upstream,
            downstream
        )
    }
}

/// Process-wide handle to the active graph snapshot.
#[derive(Clone)]
pub struct GraphHandle {
    inner: Arc<ArcSwap<DependencyGraph>>,
}

impl GraphHandle {
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(graph)),
        }
    }

    /// Current snapshot. Cheap; safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<DependencyGraph> {
        self.inner.load_full()
    }

    /// Atomically replace the snapshot (hot reload).
    pub fn swap(&self, graph: DependencyGraph) {
        self.inner.store(Arc::new(graph));
    }
}

//! The graph compiler (C2): turns a frozen [`ProjectDefinition`] into an
//! immutable [`ExecutionPlan`] the scheduler can drive without ever
//! consulting a mutable project table again.

use crate::model::{BlockGroup, Edge, NodeRef, ProjectDefinition, RetryConfig, Step, StepType};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by compilation. All map onto `ErrorKind::GraphInvalid` at
/// the engine boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("start step {0} not found in project definition")]
    StartStepNotFound(Uuid),
    #[error("step {0} is not a start step")]
    NotAStartStep(Uuid),
    #[error("start step {0} has inbound edges")]
    StartStepHasInboundEdges(Uuid),
    #[error("start step {0} has more than one outbound edge")]
    StartStepMultipleOutbound(Uuid),
    #[error("edge {edge} references unknown node {node}")]
    DanglingEdgeEndpoint { edge: Uuid, node: Uuid },
    #[error("cycle detected in flattened graph, involving node {0}")]
    CycleDetected(Uuid),
    #[error(
        "edge {edge} crosses block-group boundary from container {from:?} to {to:?} without \
         routing through the group's virtual node"
    )]
    BoundaryViolation {
        edge: Uuid,
        from: Option<Uuid>,
        to: Option<Uuid>,
    },
    #[error("edge {edge} uses unknown output port `{port}` for step {step}")]
    UnknownOutputPort { edge: Uuid, step: Uuid, port: String },
    #[error("duplicate outbound edges for branch port `{port}` on step {step}")]
    DuplicateBranchPort { step: Uuid, port: String },
    #[error("unsupported or removed block-group type `{0}` referenced in definition")]
    UnsupportedGroupType(String),
    #[error("group {0} participates in a parent_group_id cycle")]
    GroupParentCycle(Uuid),
    #[error("wait step {step} has duration_ms {duration_ms}, exceeding the {MAX_WAIT_DURATION_MS}ms maximum")]
    WaitDurationTooLong { step: Uuid, duration_ms: u64 },
}

/// The longest a `wait` step may suspend for, enforced both here (compile
/// time) and by `workflow-exec`'s `WaitExecutor` (defense-in-depth against a
/// plan compiled before this check existed).
pub const MAX_WAIT_DURATION_MS: u64 = 3_600_000;

/// Non-fatal compilation warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    UnreachableFromEntry(Uuid),
}

/// A compiled step, carrying everything the dispatcher/state machine need
/// without re-touching the raw definition.
#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub id: Uuid,
    pub name: String,
    pub step_type: StepType,
    pub config: serde_json::Value,
    pub credential_bindings: HashMap<String, Uuid>,
    pub retry_config: RetryConfig,
    pub timeout_ms: u64,
    /// Outermost-to-innermost chain of containing group ids.
    pub group_chain: Vec<Uuid>,
}

/// A compiled block group.
#[derive(Debug, Clone)]
pub struct CompiledGroup {
    pub id: Uuid,
    pub group_type: crate::model::GroupType,
    pub config: serde_json::Value,
    pub parent_group_id: Option<Uuid>,
    pub pre_process: Option<String>,
    pub post_process: Option<String>,
    /// Body nodes in DAG (topological) order. A body entry may itself be a
    /// [`NodeRef::Group`] — a nested block group — which the interpreter
    /// dispatches back into the group-running path rather than the step
    /// state machine.
    pub body: Vec<NodeRef>,
}

/// A compiled edge, indexed by its source in [`ExecutionPlan::adjacency`].
#[derive(Debug, Clone)]
pub struct CompiledEdge {
    pub id: Uuid,
    pub target: NodeRef,
    pub source_port: String,
    pub target_port: String,
    pub condition: Option<String>,
}

/// The immutable, scheduler-ready compilation of a project version.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub entry: Uuid,
    pub nodes: HashMap<Uuid, CompiledStep>,
    pub groups: HashMap<Uuid, CompiledGroup>,
    pub adjacency: HashMap<NodeRef, Vec<CompiledEdge>>,
    pub reverse_adjacency: HashMap<NodeRef, Vec<NodeRef>>,
    pub in_degree: HashMap<NodeRef, usize>,
    pub topo_layers: Vec<Vec<NodeRef>>,
    pub warnings: Vec<CompileWarning>,
    /// sha256 of the canonical JSON of the source definition, used as a
    /// cheap pre-check for "publish then compile is byte-identical".
    pub fingerprint: String,
}

impl ExecutionPlan {
    #[must_use]
    pub fn step(&self, id: Uuid) -> Option<&CompiledStep> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn group(&self, id: Uuid) -> Option<&CompiledGroup> {
        self.groups.get(&id)
    }

    /// The containing group of a step, if any — the innermost entry of its
    /// `group_chain`.
    #[must_use]
    pub fn immediate_group_of(&self, step_id: Uuid) -> Option<Uuid> {
        self.nodes.get(&step_id).and_then(|s| s.group_chain.last().copied())
    }
}

const DEFAULT_STEP_TIMEOUT_MS: u64 = 60_000;

fn container_of(node: &NodeRef, steps: &HashMap<Uuid, Step>, groups: &HashMap<Uuid, BlockGroup>) -> Option<Uuid> {
    match node {
        NodeRef::Step { id } => steps.get(id).and_then(|s| s.block_group_id),
        NodeRef::Group { id } => groups.get(id).and_then(|g| g.parent_group_id),
    }
}

fn output_ports_for(step: &Step) -> Option<Vec<String>> {
    match step.step_type {
        StepType::Condition => Some(vec!["true".to_string(), "false".to_string()]),
        StepType::Switch => {
            let mut ports: Vec<String> = step
                .config
                .get("cases")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|c| c.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            ports.push("default".to_string());
            Some(ports)
        }
        _ => None,
    }
}

fn fingerprint_of(definition: &ProjectDefinition) -> String {
    // serde_json's map serialization is insertion-order; sort keys via
    // Value round-trip so the fingerprint is stable across equivalent
    // but differently-ordered JSON documents.
    let value = serde_json::to_value(definition).unwrap_or(serde_json::Value::Null);
    let canonical = canonicalize(&value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode_sha256(hasher)
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{k:?}:{}", canonicalize(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

mod hex {
    use sha2::{Digest, Sha256};

    pub fn encode_sha256(hasher: Sha256) -> String {
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Compile a project definition into an [`ExecutionPlan`] entered at
/// `start_step_id`.
///
/// # Errors
///
/// Returns [`CompileError`] for any violation of rules 1, 3-7.
/// Rule 2 (unreachable steps) is surfaced as a [`CompileWarning`] on the
/// returned plan instead.
pub fn compile(definition: &ProjectDefinition, start_step_id: Uuid) -> Result<ExecutionPlan, CompileError> {
    let steps: HashMap<Uuid, Step> = definition.steps.iter().cloned().map(|s| (s.id, s)).collect();
    let groups: HashMap<Uuid, BlockGroup> = definition
        .block_groups
        .iter()
        .cloned()
        .map(|g| (g.id, g))
        .collect();

    validate_group_parent_tree(&groups)?;

    // Rule 1: entry must exist and be a `start` step with at most one
    // outbound edge and no inbound edges.
    let start_step = steps
        .get(&start_step_id)
        .ok_or(CompileError::StartStepNotFound(start_step_id))?;
    if start_step.step_type != StepType::Start {
        return Err(CompileError::NotAStartStep(start_step_id));
    }
    let start_ref = NodeRef::Step { id: start_step_id };
    let inbound_to_start = definition
        .edges
        .iter()
        .filter(|e| e.target_ref == start_ref)
        .count();
    if inbound_to_start > 0 {
        return Err(CompileError::StartStepHasInboundEdges(start_step_id));
    }
    let outbound_from_start = definition
        .edges
        .iter()
        .filter(|e| e.source_ref == start_ref)
        .count();
    if outbound_from_start > 1 {
        return Err(CompileError::StartStepMultipleOutbound(start_step_id));
    }

    // Rule 4a: edge endpoints exist.
    for edge in &definition.edges {
        for node in [&edge.source_ref, &edge.target_ref] {
            let exists = match node {
                NodeRef::Step { id } => steps.contains_key(id),
                NodeRef::Group { id } => groups.contains_key(id),
            };
            if !exists {
                return Err(CompileError::DanglingEdgeEndpoint {
                    edge: edge.id,
                    node: node.id(),
                });
            }
        }
    }

    // Rule 5/6 (combined, see module docs on `container_of`): an edge may
    // only connect nodes whose containers match, which forces boundary
    // crossings to route through a group's own virtual node.
    for edge in &definition.edges {
        let from = container_of(&edge.source_ref, &steps, &groups);
        let to = container_of(&edge.target_ref, &steps, &groups);
        if from != to {
            return Err(CompileError::BoundaryViolation {
                edge: edge.id,
                from,
                to,
            });
        }
    }

    // Rule 4b/7: branch ports.
    for edge in &definition.edges {
        if let NodeRef::Step { id } = &edge.source_ref {
            let step = &steps[id];
            if let Some(known_ports) = output_ports_for(step) {
                if !known_ports.contains(&edge.source_port) {
                    return Err(CompileError::UnknownOutputPort {
                        edge: edge.id,
                        step: *id,
                        port: edge.source_port.clone(),
                    });
                }
            }
        }
    }
    check_duplicate_branch_ports(&definition.edges, &steps)?;

    // Rule 8: a `wait` step's literal `config.duration_ms` must not exceed
    // the one-hour maximum. `config.until` is a runtime timestamp and can't
    // be bounded here; `WaitExecutor` still enforces it at dispatch.
    for step in steps.values() {
        if step.step_type == StepType::Wait {
            if let Some(duration_ms) = step.config.get("duration_ms").and_then(|v| v.as_u64()) {
                if duration_ms > MAX_WAIT_DURATION_MS {
                    return Err(CompileError::WaitDurationTooLong { step: step.id, duration_ms });
                }
            }
        }
    }

    // Rule 3: cycle detection + topological layering over the flattened
    // graph (all steps and groups as nodes, all declared edges).
    let all_nodes: Vec<NodeRef> = steps
        .keys()
        .map(|id| NodeRef::Step { id: *id })
        .chain(groups.keys().map(|id| NodeRef::Group { id: *id }))
        .collect();

    let mut adjacency: HashMap<NodeRef, Vec<CompiledEdge>> =
        all_nodes.iter().cloned().map(|n| (n, Vec::new())).collect();
    let mut reverse_adjacency: HashMap<NodeRef, Vec<NodeRef>> =
        all_nodes.iter().cloned().map(|n| (n, Vec::new())).collect();

    for edge in &definition.edges {
        adjacency
            .entry(edge.source_ref.clone())
            .or_default()
            .push(CompiledEdge {
                id: edge.id,
                target: edge.target_ref.clone(),
                source_port: edge.source_port.clone(),
                target_port: edge.target_port.clone(),
                condition: edge.condition.clone(),
            });
        reverse_adjacency
            .entry(edge.target_ref.clone())
            .or_default()
            .push(edge.source_ref.clone());
    }

    let mut in_degree: HashMap<NodeRef, usize> = all_nodes
        .iter()
        .cloned()
        .map(|n| (n.clone(), reverse_adjacency.get(&n).map_or(0, Vec::len)))
        .collect();

    let (topo_layers, acyclic_count) = kahn_layers(&all_nodes, &adjacency, &in_degree);
    if acyclic_count != all_nodes.len() {
        let stuck = all_nodes
            .iter()
            .find(|n| !topo_layers.iter().flatten().any(|t| t == *n))
            .map(NodeRef::id)
            .unwrap_or_default();
        return Err(CompileError::CycleDetected(stuck));
    }

    // Rule 2: reachability warning (non-fatal) via BFS from entry.
    let mut visited: HashSet<NodeRef> = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start_ref.clone());
    visited.insert(start_ref.clone());
    while let Some(n) = queue.pop_front() {
        for edge in adjacency.get(&n).into_iter().flatten() {
            if visited.insert(edge.target.clone()) {
                queue.push_back(edge.target.clone());
            }
        }
    }
    let warnings: Vec<CompileWarning> = all_nodes
        .iter()
        .filter(|n| !visited.contains(n))
        .map(|n| CompileWarning::UnreachableFromEntry(n.id()))
        .collect();

    // Build compiled steps, with their group_chain.
    let mut nodes = HashMap::new();
    for step in steps.values() {
        let mut chain = Vec::new();
        let mut cur = step.block_group_id;
        while let Some(g) = cur {
            chain.push(g);
            cur = groups.get(&g).and_then(|grp| grp.parent_group_id);
        }
        chain.reverse();
        nodes.insert(
            step.id,
            CompiledStep {
                id: step.id,
                name: step.name.clone(),
                step_type: step.step_type,
                config: step.config.clone(),
                credential_bindings: step.credential_bindings.clone(),
                retry_config: step.retry_config.clone().unwrap_or_default(),
                timeout_ms: step.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS),
                group_chain: chain,
            },
        );
    }

    // Build compiled groups, each with its own body in topological order.
    // A body may contain both plain steps (`block_group_id`/`group_role ==
    // "body"`) and nested groups (`parent_group_id` pointing at this
    // group) — both are `NodeRef`s, ordered together.
    let mut compiled_groups = HashMap::new();
    for group in groups.values() {
        let body_step_nodes = steps
            .values()
            .filter(|s| s.block_group_id == Some(group.id) && s.group_role.as_deref() == Some("body"))
            .map(|s| NodeRef::Step { id: s.id });
        let body_group_nodes = groups
            .values()
            .filter(|g| g.parent_group_id == Some(group.id))
            .map(|g| NodeRef::Group { id: g.id });
        let body_nodes: Vec<NodeRef> = body_step_nodes.chain(body_group_nodes).collect();
        let body_set: HashSet<NodeRef> = body_nodes.iter().cloned().collect();
        let body_adjacency: HashMap<NodeRef, Vec<CompiledEdge>> = body_nodes
            .iter()
            .cloned()
            .map(|n| {
                let edges = adjacency
                    .get(&n)
                    .into_iter()
                    .flatten()
                    .filter(|e| body_set.contains(&e.target))
                    .cloned()
                    .collect();
                (n, edges)
            })
            .collect();
        let body_in_degree: HashMap<NodeRef, usize> = body_nodes
            .iter()
            .cloned()
            .map(|n| {
                let count = body_nodes
                    .iter()
                    .filter(|other| {
                        body_adjacency
                            .get(*other)
                            .is_some_and(|edges| edges.iter().any(|e| e.target == n))
                    })
                    .count();
                (n, count)
            })
            .collect();
        let (body_layers, _) = kahn_layers(&body_nodes, &body_adjacency, &body_in_degree);
        let ordered_body: Vec<NodeRef> = body_layers.into_iter().flatten().collect();

        compiled_groups.insert(
            group.id,
            CompiledGroup {
                id: group.id,
                group_type: group.group_type,
                config: group.config.clone(),
                parent_group_id: group.parent_group_id,
                pre_process: group.pre_process.clone(),
                post_process: group.post_process.clone(),
                body: ordered_body,
            },
        );
    }

    Ok(ExecutionPlan {
        entry: start_step_id,
        nodes,
        groups: compiled_groups,
        adjacency,
        reverse_adjacency,
        in_degree: std::mem::take(&mut in_degree),
        topo_layers,
        warnings,
        fingerprint: fingerprint_of(definition),
    })
}

fn validate_group_parent_tree(groups: &HashMap<Uuid, BlockGroup>) -> Result<(), CompileError> {
    for root in groups.keys() {
        let mut seen = HashSet::new();
        let mut cur = Some(*root);
        while let Some(g) = cur {
            if !seen.insert(g) {
                return Err(CompileError::GroupParentCycle(*root));
            }
            cur = groups.get(&g).and_then(|grp| grp.parent_group_id);
        }
    }
    Ok(())
}

fn check_duplicate_branch_ports(edges: &[Edge], steps: &HashMap<Uuid, Step>) -> Result<(), CompileError> {
    let mut seen: HashMap<(Uuid, String), ()> = HashMap::new();
    for edge in edges {
        if let NodeRef::Step { id } = &edge.source_ref {
            if matches!(
                steps.get(id).map(|s| s.step_type),
                Some(StepType::Condition | StepType::Switch)
            ) {
                let key = (*id, edge.source_port.clone());
                if seen.insert(key.clone(), ()).is_some() {
                    return Err(CompileError::DuplicateBranchPort {
                        step: *id,
                        port: key.1,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm producing a layered topological order. Returns the
/// layers plus the total count of nodes successfully ordered — callers
/// compare that count to the node total to detect a cycle.
fn kahn_layers(
    nodes: &[NodeRef],
    adjacency: &HashMap<NodeRef, Vec<CompiledEdge>>,
    in_degree: &HashMap<NodeRef, usize>,
) -> (Vec<Vec<NodeRef>>, usize) {
    let mut remaining = in_degree.clone();
    let mut layers = Vec::new();
    let mut ordered_count = 0;
    let mut frontier: Vec<NodeRef> = nodes
        .iter()
        .filter(|n| remaining.get(*n).copied().unwrap_or(0) == 0)
        .cloned()
        .collect();

    while !frontier.is_empty() {
        ordered_count += frontier.len();
        let mut next_frontier = Vec::new();
        for n in &frontier {
            for edge in adjacency.get(n).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(&edge.target) {
                    *count -= 1;
                    if *count == 0 {
                        next_frontier.push(edge.target.clone());
                    }
                }
            }
        }
        layers.push(frontier);
        frontier = next_frontier;
    }
    (layers, ordered_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn start_step(id: Uuid) -> Step {
        Step {
            id,
            name: "start".into(),
            step_type: StepType::Start,
            config: serde_json::Value::Null,
            credential_bindings: HashMap::new(),
            block_group_id: None,
            group_role: None,
            retry_config: None,
            trigger_type: Some(TriggerType::Manual),
            trigger_config: serde_json::Value::Null,
            timeout_ms: None,
        }
    }

    fn function_step(id: Uuid, name: &str) -> Step {
        Step {
            id,
            name: name.into(),
            step_type: StepType::Function,
            config: serde_json::Value::Null,
            credential_bindings: HashMap::new(),
            block_group_id: None,
            group_role: None,
            retry_config: None,
            trigger_type: None,
            trigger_config: serde_json::Value::Null,
            timeout_ms: None,
        }
    }

    fn wait_step(id: Uuid, duration_ms: u64) -> Step {
        Step {
            id,
            name: "wait".into(),
            step_type: StepType::Wait,
            config: serde_json::json!({ "duration_ms": duration_ms }),
            credential_bindings: HashMap::new(),
            block_group_id: None,
            group_role: None,
            retry_config: None,
            trigger_type: None,
            trigger_config: serde_json::Value::Null,
            timeout_ms: None,
        }
    }

    fn edge(source: Uuid, target: Uuid) -> Edge {
        Edge {
            id: Uuid::new_v4(),
            source_ref: NodeRef::Step { id: source },
            target_ref: NodeRef::Step { id: target },
            source_port: "output".into(),
            target_port: "input".into(),
            condition: None,
        }
    }

    #[test]
    fn compiles_a_simple_chain() {
        let start_id = Uuid::new_v4();
        let fn_id = Uuid::new_v4();
        let def = ProjectDefinition {
            version: 1,
            steps: vec![start_step(start_id), function_step(fn_id, "fnA")],
            edges: vec![edge(start_id, fn_id)],
            block_groups: vec![],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let plan = compile(&def, start_id).unwrap();
        assert_eq!(plan.entry, start_id);
        assert!(plan.warnings.is_empty());
        assert_eq!(plan.topo_layers.len(), 2);
    }

    #[test]
    fn rejects_cycles() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let start_id = Uuid::new_v4();
        let def = ProjectDefinition {
            version: 1,
            steps: vec![start_step(start_id), function_step(a, "a"), function_step(b, "b")],
            edges: vec![edge(start_id, a), edge(a, b), edge(b, a)],
            block_groups: vec![],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let err = compile(&def, start_id).unwrap_err();
        assert!(matches!(err, CompileError::CycleDetected(_)));
    }

    #[test]
    fn rejects_start_with_inbound_edges() {
        let start_id = Uuid::new_v4();
        let fn_id = Uuid::new_v4();
        let def = ProjectDefinition {
            version: 1,
            steps: vec![start_step(start_id), function_step(fn_id, "fnA")],
            edges: vec![edge(fn_id, start_id)],
            block_groups: vec![],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let err = compile(&def, start_id).unwrap_err();
        assert!(matches!(err, CompileError::StartStepHasInboundEdges(_)));
    }

    #[test]
    fn warns_on_unreachable_steps() {
        let start_id = Uuid::new_v4();
        let reachable = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let def = ProjectDefinition {
            version: 1,
            steps: vec![
                start_step(start_id),
                function_step(reachable, "reachable"),
                function_step(orphan, "orphan"),
            ],
            edges: vec![edge(start_id, reachable)],
            block_groups: vec![],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let plan = compile(&def, start_id).unwrap();
        assert_eq!(
            plan.warnings,
            vec![CompileWarning::UnreachableFromEntry(orphan)]
        );
    }

    #[test]
    fn fingerprint_is_stable_across_field_order() {
        let start_id = Uuid::new_v4();
        let def = ProjectDefinition {
            version: 1,
            steps: vec![start_step(start_id)],
            edges: vec![],
            block_groups: vec![],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let plan_a = compile(&def, start_id).unwrap();
        let plan_b = compile(&def, start_id).unwrap();
        assert_eq!(plan_a.fingerprint, plan_b.fingerprint);
    }

    #[test]
    fn rejects_boundary_crossing_edge_from_inner_step() {
        let start_id = Uuid::new_v4();
        let group_id = Uuid::new_v4();
        let inner = Uuid::new_v4();
        let outside = Uuid::new_v4();
        let mut inner_step = function_step(inner, "inner");
        inner_step.block_group_id = Some(group_id);
        inner_step.group_role = Some("body".to_string());
        let def = ProjectDefinition {
            version: 1,
            steps: vec![start_step(start_id), inner_step, function_step(outside, "outside")],
            edges: vec![
                Edge {
                    id: Uuid::new_v4(),
                    source_ref: NodeRef::Step { id: start_id },
                    target_ref: NodeRef::Group { id: group_id },
                    source_port: "output".into(),
                    target_port: "input".into(),
                    condition: None,
                },
                edge(inner, outside),
            ],
            block_groups: vec![BlockGroup {
                id: group_id,
                group_type: GroupType::Parallel,
                config: serde_json::json!({}),
                parent_group_id: None,
                pre_process: None,
                post_process: None,
            }],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let err = compile(&def, start_id).unwrap_err();
        assert!(matches!(err, CompileError::BoundaryViolation { .. }));
    }

    #[test]
    fn rejects_wait_step_with_duration_over_one_hour() {
        let start_id = Uuid::new_v4();
        let wait_id = Uuid::new_v4();
        let def = ProjectDefinition {
            version: 1,
            steps: vec![start_step(start_id), wait_step(wait_id, MAX_WAIT_DURATION_MS + 1)],
            edges: vec![edge(start_id, wait_id)],
            block_groups: vec![],
            variables: HashMap::new(),
            error_workflow_id: None,
        };
        let err = compile(&def, start_id).unwrap_err();
        assert!(matches!(err, CompileError::WaitDurationTooLong { .. }));
    }
}

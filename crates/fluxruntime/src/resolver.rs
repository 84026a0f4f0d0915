//! Graph validation and execution ordering.
//!
//! Only `normal` connections carry data and take part in ordering. Edges that
//! come back into a re-entrant node from one of its loop outputs are kept for routing but
//! ignored when looking for cycles, so batch/loop nodes can iterate without the
//! rest of the graph losing its acyclicity guarantee.

use crate::registry::NodeRegistry;
use fluxcore::{Connection, GraphError, NodeDefinition, SubnodeConfig, Workflow};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Downstream end of a normal connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: String,
    pub input: String,
}

/// Everything the runner needs to know about one node.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub definition: NodeDefinition,
    /// Input slots that must all hold data before the node runs.
    pub required_inputs: Vec<String>,
    pub reentrant: bool,
    /// Upstream sources per input slot, feedback edges included.
    pub inputs: BTreeMap<String, Vec<String>>,
    /// Transitive upstream nodes over forward edges.
    pub ancestors: HashSet<String>,
    /// For re-entrant nodes: nodes on a feedback cycle through this node.
    pub loop_body: HashSet<String>,
    pub subnodes: Vec<SubnodeConfig>,
    /// False for configuration-only subnodes, which never run on their own.
    pub scheduled: bool,
    /// Layer index in the execution order.
    pub layer: usize,
}

/// Validated, ordered view of a workflow.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    layers: Vec<Vec<String>>,
    nodes: HashMap<String, PlannedNode>,
    routes: HashMap<(String, String), Vec<Route>>,
    start_nodes: Vec<String>,
}

impl ExecutionPlan {
    /// Scheduled nodes grouped by layer; every node comes after all of its
    /// forward sources.
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn order(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }

    pub fn node(&self, name: &str) -> Option<&PlannedNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlannedNode> {
        self.nodes.values()
    }

    /// Nodes without forward inputs; they receive the run input.
    pub fn start_nodes(&self) -> &[String] {
        &self.start_nodes
    }

    pub fn scheduled_count(&self) -> usize {
        self.nodes.values().filter(|n| n.scheduled).count()
    }

    /// Targets of one output slot, in connection order.
    pub fn routes(&self, source: &str, output: &str) -> &[Route] {
        self.routes
            .get(&(source.to_string(), output.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ordering key: layer first, then name.
    pub fn sort_key<'a>(&'a self, name: &'a str) -> (usize, &'a str) {
        let layer = self.nodes.get(name).map(|n| n.layer).unwrap_or(usize::MAX);
        (layer, name)
    }
}

/// Validates workflows and computes their execution plan.
pub struct GraphResolver<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> GraphResolver<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, workflow: &Workflow) -> Result<ExecutionPlan, GraphError> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for node in &workflow.nodes {
            if index.contains_key(&node.name) {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
            if !self.registry.contains(&node.node_type) {
                return Err(GraphError::UnknownNodeType {
                    node: node.name.clone(),
                    node_type: node.node_type.clone(),
                });
            }
            index.insert(node.name.clone(), graph.add_node(node.name.clone()));
        }

        for conn in &workflow.connections {
            for (name, side) in [(&conn.source_node, "source"), (&conn.target_node, "target")] {
                if !index.contains_key(name) {
                    return Err(GraphError::DanglingReference {
                        node: name.clone(),
                        side,
                    });
                }
            }
        }

        check_subnodes(workflow)?;

        let metadata: HashMap<&str, _> = workflow
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), self.registry.get_metadata(&n.node_type).unwrap_or_default()))
            .collect();

        let normal: Vec<&Connection> = workflow
            .connections
            .iter()
            .filter(|c| !c.is_subnode())
            .collect();

        // Feedback edges come back into a re-entrant node from its own
        // loop outputs; everything else must stay acyclic.
        let loops: HashMap<&str, (Vec<String>, HashSet<String>)> = workflow
            .nodes
            .iter()
            .filter(|n| metadata[n.name.as_str()].reentrant)
            .map(|n| {
                let outputs = metadata[n.name.as_str()].loop_outputs();
                let reach = loop_reach(&normal, &n.name, &outputs);
                (n.name.as_str(), (outputs, reach))
            })
            .collect();

        let mut forward = graph;
        let mut feedback: Vec<(&str, &str)> = Vec::new();
        for conn in &normal {
            let (source, target) = (index[&conn.source_node], index[&conn.target_node]);
            let closes_loop = loops
                .get(conn.target_node.as_str())
                .is_some_and(|(outputs, reach)| {
                    if source == target {
                        outputs.contains(&conn.source_output)
                    } else {
                        reach.contains(&conn.source_node)
                    }
                });
            if closes_loop {
                feedback.push((conn.source_node.as_str(), conn.target_node.as_str()));
            } else {
                forward.add_edge(source, target, ());
            }
        }

        let layers = kahn_layers(&forward)?;

        let in_subnode_role: HashSet<&str> = workflow
            .connections
            .iter()
            .filter(|c| c.is_subnode())
            .map(|c| c.source_node.as_str())
            .collect();
        let in_normal_role: HashSet<&str> = normal
            .iter()
            .flat_map(|c| [c.source_node.as_str(), c.target_node.as_str()])
            .collect();

        let mut nodes = HashMap::new();
        for definition in &workflow.nodes {
            let name = definition.name.as_str();
            let idx = index[name];
            let meta = &metadata[name];

            let mut inputs: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for conn in normal.iter().filter(|c| c.target_node == name) {
                inputs
                    .entry(conn.target_input.clone())
                    .or_default()
                    .push(conn.source_node.clone());
            }

            let ancestors = ancestors_of(&forward, idx);

            let mut loop_body = HashSet::new();
            if meta.reentrant {
                let descendants = descendants_of(&forward, idx);
                for (source, _) in feedback.iter().filter(|(_, target)| *target == name) {
                    let mut members = ancestors_of(&forward, index[*source]);
                    members.insert(source.to_string());
                    loop_body.extend(members.into_iter().filter(|m| descendants.contains(m)));
                }
                loop_body.remove(name);
            }

            let subnodes = workflow
                .connections
                .iter()
                .filter(|c| c.is_subnode() && c.target_node == name)
                .filter_map(|c| {
                    workflow.find_node(&c.source_node).map(|sub| SubnodeConfig {
                        name: sub.name.clone(),
                        node_type: sub.node_type.clone(),
                        slot: c.target_input.clone(),
                        parameters: sub.parameters.clone(),
                    })
                })
                .collect();

            let scheduled = !in_subnode_role.contains(name) || in_normal_role.contains(name);
            let layer = layers
                .iter()
                .position(|layer| layer.iter().any(|n| n == name))
                .unwrap_or(0);

            nodes.insert(
                name.to_string(),
                PlannedNode {
                    definition: definition.clone(),
                    required_inputs: meta.required_inputs(),
                    reentrant: meta.reentrant,
                    inputs,
                    ancestors,
                    loop_body,
                    subnodes,
                    scheduled,
                    layer,
                },
            );
        }

        let layers: Vec<Vec<String>> = layers
            .into_iter()
            .map(|layer| layer.into_iter().filter(|n| nodes[n].scheduled).collect::<Vec<_>>())
            .filter(|layer| !layer.is_empty())
            .collect();

        let start_nodes = layers
            .iter()
            .flatten()
            .filter(|name| {
                forward
                    .neighbors_directed(index[name.as_str()], Direction::Incoming)
                    .next()
                    .is_none()
            })
            .cloned()
            .collect();

        let mut routes: HashMap<(String, String), Vec<Route>> = HashMap::new();
        for conn in &normal {
            routes
                .entry((conn.source_node.clone(), conn.source_output.clone()))
                .or_default()
                .push(Route {
                    target: conn.target_node.clone(),
                    input: conn.target_input.clone(),
                });
        }

        tracing::debug!(
            workflow = %workflow.id,
            layers = layers.len(),
            feedback_edges = feedback.len(),
            "Resolved execution plan"
        );

        Ok(ExecutionPlan {
            layers,
            nodes,
            routes,
            start_nodes,
        })
    }
}

/// Nodes reachable from the loop outputs of `node` without passing through
/// `node` itself.
fn loop_reach(normal: &[&Connection], node: &str, loop_outputs: &[String]) -> HashSet<String> {
    let mut reached = HashSet::new();
    let mut stack: Vec<&str> = normal
        .iter()
        .filter(|c| c.source_node == node && loop_outputs.contains(&c.source_output))
        .map(|c| c.target_node.as_str())
        .collect();

    while let Some(current) = stack.pop() {
        if !reached.insert(current.to_string()) || current == node {
            continue;
        }
        stack.extend(
            normal
                .iter()
                .filter(|c| c.source_node == current)
                .map(|c| c.target_node.as_str()),
        );
    }
    reached
}

/// One configuration level only: a subnode may not carry subnodes itself.
fn check_subnodes(workflow: &Workflow) -> Result<(), GraphError> {
    let subnodes: HashSet<&str> = workflow
        .connections
        .iter()
        .filter(|c| c.is_subnode())
        .map(|c| c.source_node.as_str())
        .collect();

    for conn in workflow.connections.iter().filter(|c| c.is_subnode()) {
        if conn.source_node == conn.target_node {
            return Err(GraphError::InvalidConnection(format!(
                "node '{}' cannot be its own subnode",
                conn.source_node
            )));
        }
        if subnodes.contains(conn.target_node.as_str()) {
            return Err(GraphError::InvalidConnection(format!(
                "subnode '{}' cannot carry nested subnode '{}'",
                conn.target_node, conn.source_node
            )));
        }
    }
    Ok(())
}

/// Kahn's algorithm, layer by layer. Leftover nodes mean a cycle; the
/// reported names are the members of the offending strongly connected
/// components.
fn kahn_layers(graph: &DiGraph<String, ()>) -> Result<Vec<Vec<String>>, GraphError> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();

    let mut layers = Vec::new();
    let mut frontier: Vec<NodeIndex> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| *idx)
        .collect();
    let mut placed = 0;

    while !frontier.is_empty() {
        let mut names: Vec<String> = frontier.iter().map(|idx| graph[*idx].clone()).collect();
        names.sort();
        placed += frontier.len();

        let mut next = Vec::new();
        for idx in frontier {
            for target in graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(target);
                    }
                }
            }
        }
        next.sort();
        next.dedup();
        layers.push(names);
        frontier = next;
    }

    if placed < graph.node_count() {
        let mut members: Vec<String> = tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|idx| graph[idx].clone())
            .collect();
        members.sort();
        return Err(GraphError::Cycle(members));
    }

    Ok(layers)
}

fn ancestors_of(graph: &DiGraph<String, ()>, start: NodeIndex) -> HashSet<String> {
    let reversed = Reversed(graph);
    let mut dfs = Dfs::new(reversed, start);
    let mut names = HashSet::new();
    while let Some(idx) = dfs.next(reversed) {
        if idx != start {
            names.insert(graph[idx].clone());
        }
    }
    names
}

fn descendants_of(graph: &DiGraph<String, ()>, start: NodeIndex) -> HashSet<String> {
    let mut dfs = Dfs::new(graph, start);
    let mut names = HashSet::new();
    while let Some(idx) = dfs.next(graph) {
        if idx != start {
            names.insert(graph[idx].clone());
        }
    }
    names
}

use crate::resolver::{ExecutionPlan, PlannedNode};
use fluxcore::{NodeItem, NodeOutput};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Data handed to one downstream input slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source: String,
    pub output: String,
    pub target: String,
    pub input: String,
    pub items: usize,
}

/// Routes node outputs onto downstream inputs and decides readiness.
///
/// Pending data is kept per target node and input slot; items on a slot
/// keep their arrival order. A node becomes ready once its required slots
/// hold data and nothing upstream of it can still produce more.
pub struct OutputRouter<'p> {
    plan: &'p ExecutionPlan,
    inbox: HashMap<String, BTreeMap<String, Vec<NodeItem>>>,
}

impl<'p> OutputRouter<'p> {
    pub fn new(plan: &'p ExecutionPlan) -> Self {
        Self {
            plan,
            inbox: HashMap::new(),
        }
    }

    /// Place items directly on a node's input, e.g. run input for start nodes.
    pub fn seed(&mut self, node: &str, input: &str, items: Vec<NodeItem>) {
        if items.is_empty() {
            return;
        }
        self.inbox
            .entry(node.to_string())
            .or_default()
            .entry(input.to_string())
            .or_default()
            .extend(items);
    }

    /// Forward every fired output slot along its normal connections.
    /// Slots that are null or empty activate nothing.
    pub fn route(&mut self, source: &str, output: &NodeOutput) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for (slot, items) in output.fired() {
            for route in self.plan.routes(source, slot) {
                self.seed(&route.target, &route.input, items.to_vec());
                deliveries.push(Delivery {
                    source: source.to_string(),
                    output: slot.to_string(),
                    target: route.target.clone(),
                    input: route.input.clone(),
                    items: items.len(),
                });
            }
        }
        deliveries
    }

    pub fn has_pending(&self, node: &str) -> bool {
        self.inbox.contains_key(node)
    }

    /// Nodes with data waiting, in plan order.
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inbox.keys().cloned().collect();
        names.sort_by(|a, b| self.plan.sort_key(a).cmp(&self.plan.sort_key(b)));
        names
    }

    /// Ready nodes in plan order. `iterating` names re-entrant nodes that
    /// still hold loop state; they count as live even with no pending data,
    /// and re-enter with empty input once their loop body has settled
    /// without feeding anything back.
    pub fn ready_nodes(&self, iterating: &HashSet<String>) -> Vec<String> {
        let mut candidates = self.pending();
        for name in iterating {
            if !self.inbox.contains_key(name.as_str()) {
                candidates.push(name.clone());
            }
        }
        candidates.sort_by(|a, b| self.plan.sort_key(a).cmp(&self.plan.sort_key(b)));

        candidates
            .into_iter()
            .filter(|name| {
                self.plan
                    .node(name)
                    .is_some_and(|node| node.scheduled && self.is_ready(node, iterating))
            })
            .collect()
    }

    /// Remove and return a node's pending inputs.
    pub fn take_inputs(&mut self, node: &str) -> BTreeMap<String, Vec<NodeItem>> {
        self.inbox.remove(node).unwrap_or_default()
    }

    fn is_ready(&self, node: &PlannedNode, iterating: &HashSet<String>) -> bool {
        let name = node.definition.name.as_str();
        let Some(slots) = self.inbox.get(name) else {
            return node.reentrant
                && iterating.contains(name)
                && !self.is_blocked(node, iterating);
        };
        let satisfied = node
            .required_inputs
            .iter()
            .all(|slot| slots.get(slot).is_some_and(|items| !items.is_empty()));
        satisfied && !self.is_blocked(node, iterating)
    }

    fn is_blocked(&self, node: &PlannedNode, iterating: &HashSet<String>) -> bool {
        let name = node.definition.name.as_str();
        let live = |candidate: &String| {
            self.inbox.contains_key(candidate.as_str()) || iterating.contains(candidate)
        };

        let upstream_live = node.ancestors.iter().any(|ancestor| {
            let inside_its_loop = self
                .plan
                .node(ancestor)
                .is_some_and(|a| a.reentrant && a.loop_body.contains(name));
            !inside_its_loop && live(ancestor)
        });

        // A loop node waits until its body has settled before re-entering.
        let body_live = node.reentrant && node.loop_body.iter().any(live);

        upstream_live || body_live
    }
}

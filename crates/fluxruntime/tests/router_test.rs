mod common;

use common::{registry, workflow, Probes};
use fluxcore::{NodeDefinition, NodeItem, NodeOutput};
use fluxruntime::{Delivery, GraphResolver, OutputRouter};
use serde_json::json;
use std::collections::HashSet;

fn items(values: &[i64]) -> Vec<NodeItem> {
    values.iter().map(|v| NodeItem::new(json!({"v": v}))).collect()
}

#[test]
fn test_route_fans_out_in_connection_order() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("src", "test.pass"), ("x", "test.pass"), ("y", "test.pass")]);
    wf.connect("src", "y");
    wf.connect("src", "x");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();

    let mut router = OutputRouter::new(&plan);
    let deliveries = router.route("src", &NodeOutput::main(items(&[1, 2])));

    let targets: Vec<&str> = deliveries.iter().map(|d| d.target.as_str()).collect();
    assert_eq!(targets, vec!["y", "x"]);
    assert_eq!(
        deliveries[0],
        Delivery {
            source: "src".to_string(),
            output: "main".to_string(),
            target: "y".to_string(),
            input: "main".to_string(),
            items: 2,
        }
    );
    assert_eq!(router.ready_nodes(&HashSet::new()), vec!["x", "y"]);
}

#[test]
fn test_empty_and_null_branches_activate_nothing() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("if", "test.branch"), ("yes", "test.pass"), ("no", "test.pass")]);
    wf.connect_slots("if", "true", "yes", "main");
    wf.connect_slots("if", "false", "no", "main");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();

    let mut router = OutputRouter::new(&plan);
    let output = NodeOutput::new()
        .with_output("true", items(&[1]))
        .without_output("false");
    router.route("if", &output);
    assert_eq!(router.pending(), vec!["yes"]);

    let mut router = OutputRouter::new(&plan);
    router.route("if", &NodeOutput::new().with_output("true", Vec::new()));
    assert!(router.pending().is_empty());
}

#[test]
fn test_items_accumulate_per_slot_in_arrival_order() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("a", "test.pass"), ("b", "test.pass"), ("sink", "test.pass")]);
    wf.connect("a", "sink");
    wf.connect("b", "sink");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();

    let mut router = OutputRouter::new(&plan);
    router.route("b", &NodeOutput::main(items(&[3])));
    router.route("a", &NodeOutput::main(items(&[1, 2])));

    let inputs = router.take_inputs("sink");
    assert_eq!(inputs["main"], items(&[3, 1, 2]));
    assert!(!router.has_pending("sink"));
}

#[test]
fn test_node_waits_for_live_ancestors() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("a", "test.pass"), ("b", "test.pass"), ("c", "test.pass")]);
    wf.connect("a", "b");
    wf.connect("a", "c");
    wf.connect("b", "c");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();

    let mut router = OutputRouter::new(&plan);
    router.route("a", &NodeOutput::main(items(&[1])));
    assert_eq!(router.ready_nodes(&HashSet::new()), vec!["b"]);

    router.take_inputs("b");
    router.route("b", &NodeOutput::main(items(&[2])));
    assert_eq!(router.ready_nodes(&HashSet::new()), vec!["c"]);
    assert_eq!(router.take_inputs("c")["main"].len(), 2);
}

#[test]
fn test_required_slots_gate_readiness() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("x", "test.pass"), ("y", "test.pass")]);
    wf.add_node(NodeDefinition::new("join", "test.join"));
    wf.connect_slots("x", "main", "join", "a");
    wf.connect_slots("y", "main", "join", "b");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();

    let mut router = OutputRouter::new(&plan);
    router.route("x", &NodeOutput::main(items(&[1])));
    assert!(router.ready_nodes(&HashSet::new()).is_empty());
    assert_eq!(router.pending(), vec!["join"]);

    router.route("y", &NodeOutput::main(items(&[2])));
    assert_eq!(router.ready_nodes(&HashSet::new()), vec!["join"]);
}

#[test]
fn test_loop_body_runs_before_loop_node_reenters() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("batches", "test.loop"), ("work", "test.pass"), ("after", "test.pass")]);
    wf.connect_slots("batches", "loop", "work", "main");
    wf.connect("work", "batches");
    wf.connect_slots("batches", "done", "after", "main");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    let iterating: HashSet<String> = ["batches".to_string()].into();

    let mut router = OutputRouter::new(&plan);
    router.seed("batches", "main", items(&[1]));
    assert_eq!(router.ready_nodes(&HashSet::new()), vec!["batches"]);
    router.take_inputs("batches");

    // Loop body fed while the loop node keeps its state.
    router.route("batches", &NodeOutput::new().with_output("loop", items(&[1])));
    assert_eq!(router.ready_nodes(&iterating), vec!["work"]);

    router.take_inputs("work");
    router.route("work", &NodeOutput::main(items(&[1])));
    assert_eq!(router.ready_nodes(&iterating), vec!["batches"]);

    router.take_inputs("batches");
    router.route("batches", &NodeOutput::new().with_output("done", items(&[9])));
    // While the loop node still holds state, `after` waits on it.
    assert_eq!(router.ready_nodes(&iterating), vec!["batches"]);
    assert_eq!(router.ready_nodes(&HashSet::new()), vec!["after"]);
}

#[test]
fn test_loop_node_resumes_when_body_feeds_nothing_back() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("batches", "test.loop"), ("filter", "test.branch"), ("after", "test.pass")]);
    wf.connect_slots("batches", "loop", "filter", "main");
    wf.connect_slots("filter", "true", "batches", "main");
    wf.connect_slots("batches", "done", "after", "main");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    let iterating: HashSet<String> = ["batches".to_string()].into();

    let mut router = OutputRouter::new(&plan);
    router.route("batches", &NodeOutput::new().with_output("loop", items(&[1, 2])));
    assert_eq!(router.ready_nodes(&iterating), vec!["filter"]);
    router.take_inputs("filter");

    // Every item filtered out: nothing comes back on the feedback edge.
    let routed = router.route(
        "filter",
        &NodeOutput::new().with_output("false", items(&[1, 2])).without_output("true"),
    );
    assert!(routed.is_empty());
    assert!(router.pending().is_empty());

    assert_eq!(router.ready_nodes(&iterating), vec!["batches"]);
    assert!(router.take_inputs("batches").is_empty());
    assert!(router.ready_nodes(&HashSet::new()).is_empty());
}

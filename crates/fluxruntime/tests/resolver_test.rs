mod common;

use common::{registry, workflow, Probes};
use fluxcore::{GraphError, NodeDefinition, Workflow};
use fluxruntime::GraphResolver;

fn position(order: &[String], name: &str) -> usize {
    order.iter().position(|n| n == name).unwrap()
}

fn assert_sources_first(workflow: &Workflow, order: &[String]) {
    for conn in workflow.connections.iter().filter(|c| !c.is_subnode()) {
        assert!(
            position(order, &conn.source_node) < position(order, &conn.target_node),
            "{} should come before {}",
            conn.source_node,
            conn.target_node
        );
    }
}

#[test]
fn test_order_respects_every_normal_connection() {
    let registry = registry(&Probes::default());
    let shapes: Vec<Vec<(&str, &str)>> = vec![
        vec![("a", "b"), ("b", "c"), ("c", "d")],
        vec![("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        vec![("e", "d"), ("d", "c"), ("c", "b"), ("b", "a"), ("e", "a")],
        vec![("a", "c"), ("b", "c"), ("c", "d"), ("b", "e"), ("e", "d"), ("a", "e")],
    ];

    for edges in shapes {
        let mut names: Vec<&str> = edges.iter().flat_map(|(s, t)| [*s, *t]).collect();
        names.sort();
        names.dedup();

        let nodes: Vec<(&str, &str)> = names.iter().map(|n| (*n, "test.pass")).collect();
        let mut wf = workflow(&nodes);
        for (source, target) in &edges {
            wf.connect(*source, *target);
        }

        let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
        let order = plan.order();
        assert_eq!(order.len(), names.len());
        assert_sources_first(&wf, &order);
    }
}

#[test]
fn test_layers_group_independent_nodes() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("start", "test.pass"), ("x", "test.pass"), ("y", "test.pass"), ("end", "test.pass")]);
    wf.connect("start", "x");
    wf.connect("start", "y");
    wf.connect("x", "end");
    wf.connect("y", "end");

    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    assert_eq!(
        plan.layers(),
        &[
            vec!["start".to_string()],
            vec!["x".to_string(), "y".to_string()],
            vec!["end".to_string()],
        ]
    );
    assert_eq!(plan.start_nodes(), &["start".to_string()]);
}

#[test]
fn test_normal_cycle_rejected_but_subnode_cycle_accepted() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("a", "test.pass"), ("b", "test.pass"), ("c", "test.pass")]);
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf.connect("c", "b");

    match GraphResolver::new(&registry).resolve(&wf) {
        Err(GraphError::Cycle(members)) => assert_eq!(members, vec!["b", "c"]),
        other => panic!("expected cycle, got {:?}", other.map(|p| p.order())),
    }

    wf.connections.pop();
    wf.attach_subnode("c", "b", "tool");
    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    assert_eq!(plan.order(), vec!["a", "b", "c"]);
    assert_eq!(plan.node("b").unwrap().subnodes[0].name, "c");
}

#[test]
fn test_structural_errors() {
    let registry = registry(&Probes::default());

    let duplicate = workflow(&[("a", "test.pass"), ("a", "test.pass")]);
    assert_eq!(
        GraphResolver::new(&registry).resolve(&duplicate).unwrap_err(),
        GraphError::DuplicateName("a".to_string())
    );

    let mut dangling = workflow(&[("a", "test.pass")]);
    dangling.connect("a", "ghost");
    assert!(matches!(
        GraphResolver::new(&registry).resolve(&dangling),
        Err(GraphError::DanglingReference { ref node, side: "target" }) if node == "ghost"
    ));

    let unknown = workflow(&[("a", "no.such.type")]);
    assert!(matches!(
        GraphResolver::new(&registry).resolve(&unknown),
        Err(GraphError::UnknownNodeType { .. })
    ));
}

#[test]
fn test_nested_subnodes_rejected() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("agent", "test.pass"), ("model", "test.pass"), ("options", "test.pass")]);
    wf.attach_subnode("model", "agent", "ai_model");
    wf.attach_subnode("options", "model", "config");

    assert!(matches!(
        GraphResolver::new(&registry).resolve(&wf),
        Err(GraphError::InvalidConnection(_))
    ));
}

#[test]
fn test_pure_subnodes_are_not_scheduled() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("start", "test.pass"), ("agent", "test.pass"), ("model", "test.pass")]);
    wf.connect("start", "agent");
    wf.attach_subnode("model", "agent", "ai_model");

    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    assert_eq!(plan.order(), vec!["start", "agent"]);
    assert_eq!(plan.start_nodes(), &["start".to_string()]);
    assert_eq!(plan.scheduled_count(), 2);
    assert!(!plan.node("model").unwrap().scheduled);
}

#[test]
fn test_feedback_into_loop_node_is_not_a_cycle() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[
        ("start", "test.pass"),
        ("batches", "test.loop"),
        ("work", "test.pass"),
        ("after", "test.pass"),
    ]);
    wf.connect("start", "batches");
    wf.connect_slots("batches", "loop", "work", "main");
    wf.connect("work", "batches");
    wf.connect_slots("batches", "done", "after", "main");

    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    assert_eq!(plan.order(), vec!["start", "batches", "after", "work"]);

    let batches = plan.node("batches").unwrap();
    assert!(batches.reentrant);
    assert!(batches.loop_body.contains("work"));
    assert!(!batches.loop_body.contains("after"));
    assert_eq!(plan.node("work").unwrap().ancestors.len(), 2);
}

#[test]
fn test_self_loop_on_loop_node_accepted() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("batches", "test.loop")]);
    wf.connect_slots("batches", "loop", "batches", "main");

    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    assert_eq!(plan.start_nodes(), &["batches".to_string()]);
    assert!(plan.node("batches").unwrap().loop_body.is_empty());
}

#[test]
fn test_cycle_through_done_output_rejected() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("a", "test.pass"), ("l", "test.loop"), ("b", "test.pass")]);
    wf.connect("a", "l");
    wf.connect_slots("l", "done", "b", "main");
    wf.connect("b", "a");

    assert_eq!(
        GraphResolver::new(&registry).resolve(&wf).unwrap_err(),
        GraphError::Cycle(vec!["a".to_string(), "b".to_string(), "l".to_string()])
    );
}

#[test]
fn test_self_loop_from_done_output_rejected() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("l", "test.loop")]);
    wf.connect_slots("l", "done", "l", "main");

    assert_eq!(
        GraphResolver::new(&registry).resolve(&wf).unwrap_err(),
        GraphError::Cycle(vec!["l".to_string()])
    );
}

#[test]
fn test_loop_body_cannot_leak_through_done_branch() {
    // work re-enters the loop; after -> start closes a cycle over `done`.
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[
        ("start", "test.pass"),
        ("batches", "test.loop"),
        ("work", "test.pass"),
        ("after", "test.pass"),
    ]);
    wf.connect("start", "batches");
    wf.connect_slots("batches", "loop", "work", "main");
    wf.connect("work", "batches");
    wf.connect_slots("batches", "done", "after", "main");
    wf.connect("after", "start");

    assert!(matches!(
        GraphResolver::new(&registry).resolve(&wf),
        Err(GraphError::Cycle(members)) if members.contains(&"after".to_string())
    ));
}

#[test]
fn test_self_loop_on_plain_node_rejected() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("a", "test.pass")]);
    wf.connect("a", "a");

    assert_eq!(
        GraphResolver::new(&registry).resolve(&wf).unwrap_err(),
        GraphError::Cycle(vec!["a".to_string()])
    );
}

#[test]
fn test_required_inputs_come_from_metadata() {
    let registry = registry(&Probes::default());
    let mut wf = workflow(&[("x", "test.pass"), ("y", "test.pass")]);
    wf.add_node(NodeDefinition::new("join", "test.join"));
    wf.connect_slots("x", "main", "join", "a");
    wf.connect_slots("y", "main", "join", "b");

    let plan = GraphResolver::new(&registry).resolve(&wf).unwrap();
    let join = plan.node("join").unwrap();
    assert_eq!(join.required_inputs, vec!["a", "b"]);
    assert_eq!(join.inputs["a"], vec!["x"]);
    assert_eq!(join.inputs["b"], vec!["y"]);
}

//! Call-graph extraction: direct calls, dynamic dispatch, unresolved
//! targets, and the fake-root sweep.

mod common;

use common::{call, call_stmt, fun, run, run_opts, s, set, v};
use umbra::{
    CallNode, InterpError, Opts,
    ast::{ClassDef, Expr, FunDef, MethodDef, Stmt},
};

fn toplevel() -> CallNode {
    CallNode::File("test".to_owned())
}

// =============================================================================
// 1. Direct calls
// =============================================================================

/// Call chains produce one edge per caller/callee pair.
#[test]
fn direct_calls_chain_edges() {
    let program = vec![
        fun("a", &[], vec![call_stmt("b", vec![])]),
        fun("b", &[], vec![]),
        call_stmt("a", vec![]),
    ];
    let analysis = run(&program);
    assert!(analysis.call_graph.has_edge(&toplevel(), &CallNode::fun("a")));
    assert!(
        analysis
            .call_graph
            .has_edge(&CallNode::fun("a"), &CallNode::fun("b"))
    );
    assert!(
        !analysis.call_graph.has_edge(&toplevel(), &CallNode::fun("b")),
        "b is only reachable through a"
    );
}

/// An unresolved callee still contributes an edge, then falls back to the
/// unknown-call summary.
#[test]
fn unresolved_call_still_contributes_edge() {
    let program = vec![call_stmt("missing_fn", vec![])];
    let analysis = run(&program);
    assert!(
        analysis
            .call_graph
            .has_edge(&toplevel(), &CallNode::fun("missing_fn"))
    );
}

/// Strict mode turns the miss into `UnknownFunction`.
#[test]
fn strict_mode_rejects_unresolved_calls() {
    let program = vec![call_stmt("missing_fn", vec![])];
    let err = run_opts(
        &program,
        Opts {
            strict: true,
            ..Opts::default()
        },
    )
    .expect_err("unknown function must be fatal in strict mode");
    assert!(matches!(err, InterpError::UnknownFunction(name) if name == "missing_fn"));
}

// =============================================================================
// 2. Dynamic dispatch
// =============================================================================

/// A callee merged from unrelated shapes dispatches its callable
/// alternatives and ignores the rest.
#[test]
fn sum_callee_dispatches_callable_alternatives() {
    let program = vec![
        fun("target", &[], vec![]),
        Stmt::If(
            v("$c"),
            vec![set(v("$f"), s("target"))],
            vec![set(v("$f"), Expr::Int(1))],
        ),
        Stmt::Expr(Expr::Call(Box::new(v("$f")), vec![])),
    ];
    let analysis = run(&program);
    assert!(
        analysis.call_graph.has_edge(&toplevel(), &CallNode::fun("target")),
        "graph: {}",
        analysis.call_graph.to_json()
    );
}

/// A callee that narrows to nothing callable is `LostControl` in strict
/// mode.
#[test]
fn uncallable_value_is_lost_control_in_strict_mode() {
    let program = vec![
        set(v("$f"), Expr::Int(1)),
        Stmt::Expr(Expr::Call(Box::new(v("$f")), vec![])),
    ];
    let err = run_opts(
        &program,
        Opts {
            strict: true,
            ..Opts::default()
        },
    )
    .expect_err("calling an int must be fatal in strict mode");
    assert!(matches!(err, InterpError::LostControl(_)));
}

// =============================================================================
// 3. The fake-root sweep
// =============================================================================

/// With `extract_paths`, definitions unreachable from top-level code get
/// edges from the synthetic root.
#[test]
fn extract_paths_sweeps_all_definitions() {
    let program = vec![
        fun("unused", &[], vec![]),
        Stmt::ClassDef(ClassDef {
            name: "Z".to_owned(),
            parent: None,
            constants: vec![],
            vars: vec![],
            methods: vec![MethodDef {
                is_static: false,
                def: FunDef {
                    name: "m".to_owned(),
                    params: vec![],
                    body: vec![],
                },
            }],
        }),
    ];
    let analysis = run_opts(
        &program,
        Opts {
            extract_paths: true,
            ..Opts::default()
        },
    )
    .expect("sweep succeeds");
    assert!(
        analysis.call_graph.has_edge(&CallNode::Root, &CallNode::fun("unused")),
        "graph: {}",
        analysis.call_graph.to_json()
    );
    assert!(
        analysis
            .call_graph
            .has_edge(&CallNode::Root, &CallNode::method("Z", "m")),
        "graph: {}",
        analysis.call_graph.to_json()
    );
}

/// Without the sweep, unreachable definitions contribute nothing.
#[test]
fn no_sweep_without_extract_paths() {
    let program = vec![fun("unused", &[], vec![])];
    let analysis = run(&program);
    assert!(analysis.call_graph.is_empty(), "graph: {}", analysis.call_graph.to_json());
}

// =============================================================================
// 4. Serialization
// =============================================================================

/// The JSON adjacency uses the canonical node string forms.
#[test]
fn json_export_uses_node_string_forms() {
    let program = vec![fun("a", &[], vec![]), call_stmt("a", vec![])];
    let analysis = run(&program);
    let json = analysis.call_graph.to_json();
    let callees = json
        .get("File:test")
        .and_then(|v| v.as_array())
        .expect("File:test caller present");
    assert!(
        callees.iter().any(|c| c.as_str() == Some("Function:a")),
        "json: {json}"
    );
}

/// Repeated calls to the same target do not duplicate edges.
#[test]
fn edges_are_deduplicated() {
    let program = vec![
        fun("a", &[], vec![]),
        call_stmt("a", vec![]),
        call_stmt("a", vec![]),
    ];
    let analysis = run(&program);
    let callees: Vec<_> = analysis.call_graph.callees(&toplevel()).collect();
    assert_eq!(callees.len(), 1);
}

/// Free-function bundles formed by assignment dispatch like strings.
#[test]
fn call_result_feeds_call_graph_transitively() {
    let program = vec![
        fun("leaf", &[], vec![]),
        fun("name_of", &[], vec![common::ret(s("leaf"))]),
        Stmt::Expr(Expr::Call(Box::new(call("name_of", vec![])), vec![])),
    ];
    let analysis = run(&program);
    assert!(
        analysis.call_graph.has_edge(&toplevel(), &CallNode::fun("leaf")),
        "graph: {}",
        analysis.call_graph.to_json()
    );
}

//! Bounded evaluation: the recursion cap, the depth cap for clean calls,
//! and the taint-forced bypass.

mod common;

use common::{binop, call, call_stmt, fun, idx, int, ret, run, run_opts, s, set, v};
use umbra::{
    CallNode, Opts, Value,
    ast::{BinOp, Stmt},
    find_taint,
};

/// `function f($n){ if ($n <= 0) return 0; return f($n - 1); } f(100);`
/// — terminates in bounded time; the recursion cap engages.
#[test]
fn self_recursion_terminates() {
    let program = vec![
        fun(
            "f",
            &["$n"],
            vec![
                Stmt::If(
                    binop(BinOp::Le, v("$n"), int(0)),
                    vec![ret(int(0))],
                    vec![],
                ),
                ret(call("f", vec![binop(BinOp::Sub, v("$n"), int(1))])),
            ],
        ),
        set(v("$r"), call("f", vec![int(100)])),
    ];
    let analysis = run(&program);
    let r = analysis.var("$r").expect("$r bound");
    // the cap truncates with Any; the base case keeps the int shape
    assert!(contains_cap_shape(&r), "unexpected result shape: {r:?}");
    assert!(
        analysis
            .call_graph
            .has_edge(&CallNode::fun("f"), &CallNode::fun("f")),
        "the recursive edge should be recorded"
    );
}

fn contains_cap_shape(v: &Value) -> bool {
    match v {
        Value::Any | Value::Int(_) | Value::Abstract(_) => true,
        Value::Sum(alts) => alts.iter().any(contains_cap_shape),
        _ => false,
    }
}

/// Mutually recursive functions terminate under the same cap.
#[test]
fn mutual_recursion_terminates() {
    let program = vec![
        fun("even", &["$n"], vec![ret(call("odd", vec![v("$n")]))]),
        fun("odd", &["$n"], vec![ret(call("even", vec![v("$n")]))]),
        call_stmt("even", vec![int(9)]),
    ];
    let analysis = run(&program);
    assert!(
        analysis
            .call_graph
            .has_edge(&CallNode::fun("even"), &CallNode::fun("odd"))
    );
    assert!(
        analysis
            .call_graph
            .has_edge(&CallNode::fun("odd"), &CallNode::fun("even"))
    );
}

/// Builds `f0 -> f1 -> ... -> f9`, where the last function records that it
/// ran by writing a global.
fn deep_chain(arg_from_source: bool) -> Vec<Stmt> {
    let mut program = Vec::new();
    for i in 0..10 {
        let body = if i == 9 {
            vec![
                Stmt::Global(vec!["$reached".to_owned()]),
                set(v("$reached"), int(1)),
            ]
        } else {
            vec![call_stmt(&format!("f{}", i + 1), vec![v("$x")])]
        };
        program.push(fun(&format!("f{i}"), &["$x"], body));
    }
    let arg = if arg_from_source {
        idx(v("$_GET"), s("q"))
    } else {
        int(1)
    };
    program.push(call_stmt("f0", vec![arg]));
    program
}

/// A clean chain is cut at the depth cap: the tail never runs.
#[test]
fn clean_chain_is_cut_at_depth_cap() {
    let analysis = run_opts(
        &deep_chain(false),
        Opts {
            max_depth: 4,
            ..Opts::default()
        },
    )
    .expect("analysis succeeds");
    assert!(
        !analysis.has_var("$reached"),
        "the tail of a clean chain must be pruned"
    );
}

/// Raising the cap lets the same chain run to the end.
#[test]
fn deep_cap_reaches_the_tail() {
    let analysis = run_opts(
        &deep_chain(false),
        Opts {
            max_depth: 32,
            ..Opts::default()
        },
    )
    .expect("analysis succeeds");
    // the global starts as Null and the one assignment widens it
    assert_eq!(
        analysis.var("$reached"),
        Some(Value::Sum(vec![Value::Null, Value::Int(1)]))
    );
}

/// A tainted argument forces exploration past the depth cap.
#[test]
fn tainted_argument_bypasses_depth_cap() {
    let analysis = run_opts(
        &deep_chain(true),
        Opts {
            max_depth: 4,
            ..Opts::default()
        },
    )
    .expect("analysis succeeds");
    assert_eq!(
        analysis.var("$reached"),
        Some(Value::Sum(vec![Value::Null, Value::Int(1)])),
        "tainted data must reach the end of the chain"
    );
}

/// Whatever the cap produces is taint-free for clean inputs.
#[test]
fn pruned_results_stay_clean() {
    let analysis = run_opts(
        &deep_chain(false),
        Opts {
            max_depth: 4,
            ..Opts::default()
        },
    )
    .expect("analysis succeeds");
    for name in ["$reached"] {
        if let Some(value) = analysis.var(name) {
            assert_eq!(find_taint(&analysis.heap, &value), None);
        }
    }
}

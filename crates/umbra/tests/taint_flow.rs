//! Taint propagation: sources, concatenation flow, sinks, and the
//! clean-call machinery around them.

mod common;

use common::{binop, call, call_stmt, fun, idx, int, ret, run, run_opts, s, set, v};
use pretty_assertions::assert_eq;
use umbra::{
    Opts, Ty, Value,
    ast::{BinOp, Expr, FunDef, Param, Stmt},
    find_taint,
};

fn render_identity() -> Stmt {
    Stmt::FuncDef(FunDef {
        name: "render".to_owned(),
        params: vec![Param::new("$v")],
        body: vec![ret(v("$v"))],
    })
}

// =============================================================================
// 1. Sources
// =============================================================================

/// A request global materializes as a map whose key and element both carry
/// the source label.
#[test]
fn request_global_is_a_tainted_map() {
    let program = vec![set(v("$x"), v("$_GET"))];
    let analysis = run(&program);
    let x = analysis.var("$x").expect("$x bound");
    assert!(matches!(x, Value::Map(_)), "expected a Map, got {x:?}");
    assert_eq!(find_taint(&analysis.heap, &x).as_deref(), Some("$_GET"));
}

/// Indexing the request map yields the tainted element summary.
#[test]
fn indexing_a_source_yields_taint() {
    let program = vec![set(v("$x"), idx(v("$_GET"), s("q")))];
    let analysis = run(&program);
    assert_eq!(analysis.var("$x"), Some(Value::Taint("$_GET".to_owned())));
}

/// With taint mode off, the source names are ordinary variables.
#[test]
fn disabled_mode_has_no_sources() {
    let program = vec![set(v("$x"), v("$_GET"))];
    let analysis = run_opts(
        &program,
        Opts {
            taint_mode: false,
            ..Opts::default()
        },
    )
    .expect("analysis succeeds");
    assert_eq!(analysis.var("$x"), Some(Value::Null));
    assert!(analysis.findings.is_empty());
}

// =============================================================================
// 2. Propagation
// =============================================================================

/// Concatenation carries the label.
#[test]
fn concat_propagates_taint() {
    let program = vec![set(v("$t"), binop(BinOp::Concat, idx(v("$_GET"), s("a")), s("!")))];
    let analysis = run(&program);
    assert_eq!(analysis.var("$t"), Some(Value::Taint("$_GET".to_owned())));
}

/// Interpolated strings carry the label of any tainted segment.
#[test]
fn interpolation_propagates_taint() {
    let program = vec![set(
        v("$t"),
        Expr::InterpString(vec![s("pre"), idx(v("$_POST"), s("k")), s("post")]),
    )];
    let analysis = run(&program);
    assert_eq!(analysis.var("$t"), Some(Value::Taint("$_POST".to_owned())));
}

/// A numeric cast sanitizes; a string cast does not.
#[test]
fn casts_sanitize_by_target_type() {
    let program = vec![
        set(v("$n"), Expr::Cast(Ty::Int, Box::new(idx(v("$_GET"), s("a"))))),
        set(v("$s"), Expr::Cast(Ty::String, Box::new(idx(v("$_GET"), s("a"))))),
    ];
    let analysis = run(&program);
    assert_eq!(analysis.var("$n"), Some(Value::Abstract(Ty::Int)));
    assert_eq!(analysis.var("$s"), Some(Value::Taint("$_GET".to_owned())));
}

/// Taint survives a round-trip through a user-defined function.
#[test]
fn taint_flows_through_calls() {
    let program = vec![
        fun("pass", &["$x"], vec![ret(v("$x"))]),
        set(v("$t"), call("pass", vec![idx(v("$_GET"), s("a"))])),
    ];
    let analysis = run(&program);
    let t = analysis.var("$t").expect("$t bound");
    assert_eq!(find_taint(&analysis.heap, &t).as_deref(), Some("$_GET"));
}

// =============================================================================
// 3. Sinks
// =============================================================================

/// `$x = $_GET; render($x);` — returning attacker data from the sink emits
/// a finding labeled with the source.
#[test]
fn sink_return_emits_finding() {
    let program = vec![
        render_identity(),
        set(v("$x"), v("$_GET")),
        call_stmt("render", vec![v("$x")]),
    ];
    let analysis = run(&program);
    assert_eq!(analysis.findings.len(), 1, "findings: {:?}", analysis.findings);
    let finding = &analysis.findings[0];
    assert_eq!(finding.sink, "render");
    assert_eq!(finding.label, "$_GET");
    assert_eq!(finding.file, "test");
    assert!(
        finding.trace.iter().any(|n| n == "Function:render"),
        "trace should include the sink frame: {:?}",
        finding.trace
    );
}

/// A clean value through the sink is not a finding.
#[test]
fn clean_sink_return_is_silent() {
    let program = vec![render_identity(), call_stmt("render", vec![s("safe")])];
    let analysis = run(&program);
    assert!(analysis.findings.is_empty(), "findings: {:?}", analysis.findings);
}

/// The sink fires for methods named `render` too.
#[test]
fn render_method_is_a_sink() {
    use umbra::ast::{ClassDef, MethodDef};
    let program = vec![
        Stmt::ClassDef(ClassDef {
            name: "Page".to_owned(),
            parent: None,
            constants: vec![],
            vars: vec![],
            methods: vec![MethodDef {
                is_static: false,
                def: FunDef {
                    name: "render".to_owned(),
                    params: vec![Param::new("$v")],
                    body: vec![ret(v("$v"))],
                },
            }],
        }),
        set(v("$p"), Expr::New(Box::new(Expr::Id("Page".to_owned())), vec![])),
        Stmt::Expr(Expr::Call(
            Box::new(Expr::ObjGet(
                Box::new(v("$p")),
                Box::new(Expr::Id("render".to_owned())),
            )),
            vec![idx(v("$_REQUEST"), s("x"))],
        )),
    ];
    let analysis = run(&program);
    assert_eq!(analysis.findings.len(), 1, "findings: {:?}", analysis.findings);
    assert_eq!(analysis.findings[0].label, "$_REQUEST");
}

// =============================================================================
// 4. Unknown calls and the safe cache
// =============================================================================

/// An unresolved call falls back to the policy's summary value.
#[test]
fn unknown_call_returns_summary() {
    let program = vec![set(v("$r"), call("mystery", vec![int(1)]))];
    let analysis = run(&program);
    assert_eq!(analysis.var("$r"), Some(Value::Any));
}

/// Taint-free returns land in the safe cache and are reused when the
/// recursion cap cuts a clean call.
#[test]
fn clean_returns_stay_taint_free_under_recursion() {
    let program = vec![
        fun(
            "f",
            &["$n"],
            vec![ret(call("f", vec![binop(BinOp::Sub, v("$n"), int(1))]))],
        ),
        set(v("$r"), call("f", vec![int(3)])),
    ];
    let analysis = run(&program);
    let r = analysis.var("$r").expect("$r bound");
    assert_eq!(find_taint(&analysis.heap, &r), None, "clean chain stays clean: {r:?}");
}

//! Shared builders for constructing simplified-AST programs in tests.
//!
//! The parser is an external collaborator, so tests assemble trees
//! directly; these helpers keep that bearable.
#![expect(dead_code, reason = "builders are shared across test binaries")]

use umbra::{
    Analysis, Analyzer, Db, InterpResult, Opts,
    ast::{ArrayEntry, BinOp, Expr, FunDef, Param, Program, Stmt},
};

pub fn v(name: &str) -> Expr {
    Expr::Var(name.to_owned())
}

pub fn id(name: &str) -> Expr {
    Expr::Id(name.to_owned())
}

pub fn int(i: i64) -> Expr {
    Expr::Int(i)
}

pub fn s(text: &str) -> Expr {
    Expr::Str(text.to_owned())
}

pub fn set_e(lhs: Expr, rhs: Expr) -> Expr {
    Expr::Assign(None, Box::new(lhs), Box::new(rhs))
}

pub fn set(lhs: Expr, rhs: Expr) -> Stmt {
    Stmt::Expr(set_e(lhs, rhs))
}

pub fn binop(op: BinOp, l: Expr, r: Expr) -> Expr {
    Expr::Binop(op, Box::new(l), Box::new(r))
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(Box::new(id(name)), args)
}

pub fn call_stmt(name: &str, args: Vec<Expr>) -> Stmt {
    Stmt::Expr(call(name, args))
}

/// `$obj->name(args)`
pub fn mcall(obj: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(Box::new(Expr::ObjGet(Box::new(obj), Box::new(id(name)))), args)
}

/// `$base[key]`
pub fn idx(base: Expr, key: Expr) -> Expr {
    Expr::ArrayGet(Box::new(base), Some(Box::new(key)))
}

pub fn ret(e: Expr) -> Stmt {
    Stmt::Return(Some(e))
}

pub fn fun(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    Stmt::FuncDef(FunDef {
        name: name.to_owned(),
        params: params.iter().map(|p| Param::new(p)).collect(),
        body,
    })
}

/// `array(k1 => v1, v2, ...)` — entries with `None` keys are positional.
pub fn arr(entries: Vec<(Option<Expr>, Expr)>) -> Expr {
    Expr::ConsArray(
        entries
            .into_iter()
            .map(|(key, value)| ArrayEntry { key, value })
            .collect(),
    )
}

/// Runs a program with default options against a database built from it.
pub fn run(program: &Program) -> Analysis {
    let db = Db::from_programs([program]);
    Analyzer::new(&db)
        .run("test", program)
        .expect("analysis should succeed")
}

/// Runs with explicit options, surfacing errors to the caller.
pub fn run_opts(program: &Program, opts: Opts) -> InterpResult<Analysis> {
    let db = Db::from_programs([program]);
    Analyzer::with_opts(&db, opts).run("test", program)
}

#![doc = include_str!("../../../README.md")]

pub mod ast;
mod call;
mod class;
mod db;
mod env;
mod error;
mod expr;
mod graph;
mod heap;
mod run;
mod stmt;
mod taint;
pub mod tracer;
mod unify;
mod value;

pub use crate::{
    db::Db,
    env::{ARRAY_VAR, BUILD_METHOD, CLASS_MEMBER, OBJ_VAR, PARENT_KW, RETURN_VAR, SELF_KW, THIS_VAR, is_variable},
    error::{InterpError, InterpResult},
    graph::{CallGraph, CallNode},
    heap::{Heap, HeapStats},
    run::{Analysis, Analyzer, DEFAULT_MAX_DEPTH, Opts, Snapshot},
    taint::{
        NoTaint, RequestTaint, SINK_NAME, SOURCE_NAMES, TaintFinding, TaintHook, find_taint, is_taint_free,
        plain_concat,
    },
    tracer::{AnalysisTracer, NoopTracer, PruneReason, StderrTracer},
    unify::{Unifier, leq, unify},
    value::{Addr, AddrSet, Closure, MapSummary, MethodVal, Ty, Value, addr_set},
};

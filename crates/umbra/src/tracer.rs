//! Analysis tracing infrastructure.
//!
//! A trait-based tracing system with zero-cost abstraction: the interpreter
//! carries the tracer as a type parameter, so with [`NoopTracer`] every hook
//! compiles away through monomorphization. Implementations only override
//! the hooks they care about.

use crate::{graph::CallNode, taint::TaintFinding};

/// Why the call engine skipped a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneReason {
    /// The callee was already twice on the current chain.
    Recursion,
    /// The chain hit the depth cap and every argument was taint-free.
    Depth,
}

/// Hook points at key interpretation events.
///
/// All methods have default no-op implementations.
pub trait AnalysisTracer: std::fmt::Debug {
    /// Called when the call engine enters a function or method body.
    #[inline]
    fn on_call_enter(&mut self, _key: &str, _depth: usize) {}

    /// Called when the call engine skips a body because of the recursion or
    /// depth cap.
    #[inline]
    fn on_call_pruned(&mut self, _key: &str, _reason: PruneReason) {}

    /// Called for every call-graph edge as it is recorded.
    #[inline]
    fn on_edge(&mut self, _caller: &CallNode, _callee: &CallNode) {}

    /// Called when a class is materialized by the class builder.
    #[inline]
    fn on_class_built(&mut self, _name: &str) {}

    /// Called when a taint finding is emitted.
    #[inline]
    fn on_finding(&mut self, _finding: &TaintFinding) {}

    /// Called by the `show()` debug identity with the rendered argument.
    #[inline]
    fn on_show(&mut self, _rendered: &str) {}
}

/// Zero-cost no-op tracer (the production default).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl AnalysisTracer for NoopTracer {}

/// Human-readable execution log to stderr; useful when debugging an
/// analysis interactively.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl AnalysisTracer for StderrTracer {
    fn on_call_enter(&mut self, key: &str, depth: usize) {
        eprintln!("{:indent$}call {key}", "", indent = depth * 2);
    }

    fn on_call_pruned(&mut self, key: &str, reason: PruneReason) {
        eprintln!("prune {key} ({reason:?})");
    }

    fn on_edge(&mut self, caller: &CallNode, callee: &CallNode) {
        eprintln!("edge {caller} -> {callee}");
    }

    fn on_class_built(&mut self, name: &str) {
        eprintln!("class {name}");
    }

    fn on_finding(&mut self, finding: &TaintFinding) {
        eprintln!("taint {} <- {} at {}", finding.sink, finding.label, finding.file);
    }

    fn on_show(&mut self, rendered: &str) {
        eprintln!("show: {rendered}");
    }
}

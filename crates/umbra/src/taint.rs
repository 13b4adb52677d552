//! The pluggable taint policy.
//!
//! The evaluator consults a [`TaintHook`] at well-defined injection points:
//! before ordinary expression evaluation, at string concatenation and
//! interpolation, when a call target cannot be resolved, and when a value
//! reaches a sink. The hook is a type parameter of the interpreter, so the
//! no-op policy compiles away entirely.

use ahash::AHashSet;

use crate::{
    ast::Expr,
    graph::CallNode,
    heap::Heap,
    value::{Addr, Ty, Value},
};

/// Well-known request-like globals that act as taint sources.
pub const SOURCE_NAMES: [&str; 3] = ["$_POST", "$_GET", "$_REQUEST"];

/// Functions and methods with this declared name act as sinks: their return
/// value is checked for taint.
pub const SINK_NAME: &str = "render";

/// One taint flow from a source to a sink.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TaintFinding {
    /// The sink that was reached (currently always `render`).
    pub sink: String,
    /// The label the offending value carried, i.e. the source it came from.
    pub label: String,
    /// The file under analysis when the finding was emitted.
    pub file: String,
    /// The call chain at the sink, rendered as node strings.
    pub trace: Vec<String>,
}

/// Searches a value (and the heap behind its pointers) for a taint label.
///
/// Returns the first label found, in deterministic traversal order. Cyclic
/// pointer graphs terminate via the visited set.
#[must_use]
pub fn find_taint(heap: &Heap, v: &Value) -> Option<String> {
    let mut seen: AHashSet<Addr> = AHashSet::new();
    find_taint_inner(heap, v, &mut seen)
}

/// Whether a value carries no taint anywhere reachable from it. Calls with
/// only such arguments are "clean" and eligible for depth-cap truncation.
#[must_use]
pub fn is_taint_free(heap: &Heap, v: &Value) -> bool {
    find_taint(heap, v).is_none()
}

fn find_taint_inner(heap: &Heap, v: &Value, seen: &mut AHashSet<Addr>) -> Option<String> {
    match v {
        Value::Taint(label) => Some(label.clone()),
        Value::Ptr(a) => seen.insert(*a).then(|| find_taint_inner(heap, heap.get(*a), seen)).flatten(),
        Value::Ref(set) => set
            .iter()
            .find_map(|a| seen.insert(*a).then(|| find_taint_inner(heap, heap.get(*a), seen)).flatten()),
        Value::Record(fields) | Value::Object(fields) => {
            fields.values().find_map(|f| find_taint_inner(heap, f, seen))
        }
        Value::Array(elems) => elems.iter().find_map(|e| find_taint_inner(heap, e, seen)),
        Value::Map(m) => {
            find_taint_inner(heap, &m.key, seen).or_else(|| find_taint_inner(heap, &m.elem, seen))
        }
        Value::Sum(alts) => alts.iter().find_map(|a| find_taint_inner(heap, a, seen)),
        _ => None,
    }
}

/// String concatenation without taint bookkeeping: precise on literal
/// strings, the abstract string otherwise.
#[must_use]
pub fn plain_concat(l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
        _ => Value::Abstract(Ty::String),
    }
}

/// The taint policy interface.
///
/// When the policy is disabled its operations are identity/no-op: sources
/// produce nothing special, concatenation is plain, and sinks never fire.
pub trait TaintHook: std::fmt::Debug {
    /// Whether taint propagation is active.
    fn enabled(&self) -> bool {
        true
    }

    /// Pre-evaluation intercept: may short-circuit ordinary evaluation of
    /// `e` by producing a value directly.
    fn intercept(&mut self, _heap: &mut Heap, _e: &Expr) -> Option<Value> {
        None
    }

    /// The value bound when a well-known source name is first looked up in
    /// l-value position, if this policy treats `name` as a source.
    fn source_value(&mut self, _heap: &mut Heap, _name: &str) -> Option<Value> {
        None
    }

    /// Taint flow through binary string concatenation. Operands arrive
    /// fully dereferenced.
    fn concat(&mut self, _heap: &Heap, l: &Value, r: &Value) -> Value {
        plain_concat(l, r)
    }

    /// Folds the dereferenced segments of an interpolated string.
    fn fold_segments(&mut self, _heap: &Heap, parts: &[Value]) -> Value {
        parts
            .iter()
            .cloned()
            .reduce(|acc, p| plain_concat(&acc, &p))
            .unwrap_or_else(|| Value::Str(String::new()))
    }

    /// Sink check: called with the value flowing into a sink. Returns the
    /// finding that was recorded, if any.
    fn check_danger(
        &mut self,
        _sink: &str,
        _file: &str,
        _path: &[CallNode],
        _heap: &Heap,
        _v: &Value,
    ) -> Option<TaintFinding> {
        None
    }

    /// Summary value for calls whose target could not be resolved.
    fn unknown_call(&mut self, _name: &str) -> Value {
        Value::Any
    }

    /// Drains the findings accumulated so far.
    fn take_findings(&mut self) -> Vec<TaintFinding> {
        Vec::new()
    }
}

/// The identity policy: no sources, no sinks, plain concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTaint;

impl TaintHook for NoTaint {
    fn enabled(&self) -> bool {
        false
    }
}

/// The default policy: request-like globals are sources, `render` is a
/// sink, and labels flow through concatenation and interpolation.
#[derive(Debug, Default)]
pub struct RequestTaint {
    enabled: bool,
    findings: Vec<TaintFinding>,
}

impl RequestTaint {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            findings: Vec::new(),
        }
    }

    #[must_use]
    pub fn findings(&self) -> &[TaintFinding] {
        &self.findings
    }
}

impl TaintHook for RequestTaint {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn source_value(&mut self, heap: &mut Heap, name: &str) -> Option<Value> {
        if !self.enabled || !SOURCE_NAMES.contains(&name) {
            return None;
        }
        // the whole request map is attacker-controlled: both the key and
        // the element summaries carry the source label
        let key = heap.alloc(Value::Taint(name.to_owned()));
        let elem = heap.alloc(Value::Taint(name.to_owned()));
        Some(Value::map(Value::Ptr(key), Value::Ptr(elem)))
    }

    fn concat(&mut self, heap: &Heap, l: &Value, r: &Value) -> Value {
        if self.enabled
            && let Some(label) = find_taint(heap, l).or_else(|| find_taint(heap, r))
        {
            return Value::Taint(label);
        }
        plain_concat(l, r)
    }

    fn fold_segments(&mut self, heap: &Heap, parts: &[Value]) -> Value {
        if self.enabled
            && let Some(label) = parts.iter().find_map(|p| find_taint(heap, p))
        {
            return Value::Taint(label);
        }
        parts
            .iter()
            .cloned()
            .reduce(|acc, p| plain_concat(&acc, &p))
            .unwrap_or_else(|| Value::Str(String::new()))
    }

    fn check_danger(
        &mut self,
        sink: &str,
        file: &str,
        path: &[CallNode],
        heap: &Heap,
        v: &Value,
    ) -> Option<TaintFinding> {
        if !self.enabled {
            return None;
        }
        let label = find_taint(heap, v)?;
        let finding = TaintFinding {
            sink: sink.to_owned(),
            label,
            file: file.to_owned(),
            trace: path.iter().map(ToString::to_string).collect(),
        };
        self.findings.push(finding.clone());
        Some(finding)
    }

    fn take_findings(&mut self) -> Vec<TaintFinding> {
        std::mem::take(&mut self.findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taint_scan_follows_pointers_and_terminates_on_cycles() {
        let mut heap = Heap::new();
        let a = heap.new_cell();
        let b = heap.alloc(Value::Ptr(a));
        heap.set(a, Value::Ptr(b));
        assert_eq!(find_taint(&heap, &Value::Ptr(a)), None);

        let t = heap.alloc(Value::Taint("$_GET".into()));
        let container = Value::Array(vec![Value::Ptr(a), Value::Ptr(t)]);
        assert_eq!(find_taint(&heap, &container).as_deref(), Some("$_GET"));
    }

    #[test]
    fn disabled_policy_concat_is_plain() {
        let heap = Heap::new();
        let mut hook = RequestTaint::new(false);
        let out = hook.concat(&heap, &Value::Taint("$_GET".into()), &Value::Str("x".into()));
        assert_eq!(out, Value::Abstract(Ty::String));
    }
}

use std::{collections::BTreeMap, fmt::Write};

use ahash::AHashSet;

use crate::value::{Addr, Value};

/// Fallback cell for reads of addresses the heap has never seen.
/// Missing cells conservatively read as `Null`.
static NULL_CELL: Value = Value::Null;

/// Snapshot of heap composition at a point in time.
///
/// Counts live cells by variant name. Uses `BTreeMap` for deterministic
/// iteration order, making snapshots suitable for display and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of cells ever allocated.
    pub cells: usize,
    /// Breakdown of cells by `Value` variant name.
    pub cells_by_variant: BTreeMap<&'static str, usize>,
}

/// The address-indexed store of abstract values.
///
/// Addresses are handed out monotonically; cells are replaced in place and
/// never collected. The heap is threaded through every evaluation step:
/// evaluators take `&mut Heap` and leave the updated store behind rather
/// than returning a new one.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Heap {
    cells: Vec<Value>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh cell holding `v` and returns its address.
    pub fn alloc(&mut self, v: Value) -> Addr {
        let addr = Addr::new(self.cells.len());
        self.cells.push(v);
        addr
    }

    /// Allocates a fresh cell holding `Null`.
    pub fn new_cell(&mut self) -> Addr {
        self.alloc(Value::Null)
    }

    /// Reads the cell at `addr`. An address the heap does not know reads
    /// as `Null`.
    #[must_use]
    pub fn get(&self, addr: Addr) -> &Value {
        self.cells.get(addr.index()).unwrap_or(&NULL_CELL)
    }

    /// Replaces the cell at `addr` with `v`.
    ///
    /// # Panics
    /// Panics if `addr` was never allocated; writes never invent cells.
    pub fn set(&mut self, addr: Addr, v: Value) {
        self.cells[addr.index()] = v;
    }

    /// Single-step indirection: if `v` is a `Ptr`, the pointed-to cell,
    /// otherwise `v` itself.
    #[must_use]
    pub fn chase<'v>(&'v self, v: &'v Value) -> &'v Value {
        match v {
            Value::Ptr(a) => self.get(*a),
            other => other,
        }
    }

    /// Follows pointer indirection until a non-indirect value is reached,
    /// returning a clone. Multi-target references follow their first
    /// member: unification writes merged contents back to every member, so
    /// any one of them is representative. Cycles terminate via a visited
    /// set; a cycle resolves to the last pointer before re-entry.
    #[must_use]
    pub fn resolve(&self, v: &Value) -> Value {
        let mut seen = AHashSet::new();
        let mut cur = v;
        loop {
            match cur {
                Value::Ptr(a) if seen.insert(*a) => cur = self.get(*a),
                Value::Ref(set) => match set.first() {
                    Some(a) if seen.insert(*a) => cur = self.get(*a),
                    _ => break,
                },
                _ => break,
            }
        }
        cur.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Computes a snapshot of heap composition.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut cells_by_variant: BTreeMap<&'static str, usize> = BTreeMap::new();
        for cell in &self.cells {
            *cells_by_variant.entry(cell.variant_name()).or_insert(0) += 1;
        }
        HeapStats {
            cells: self.cells.len(),
            cells_by_variant,
        }
    }

    /// Renders a value for diagnostics, dereferencing pointers inline.
    ///
    /// Each address is added to the working set before its target is
    /// rendered and removed afterwards, so shared substructure prints in
    /// full while cyclic pointer graphs terminate with a `rec` marker.
    #[must_use]
    pub fn render(&self, v: &Value) -> String {
        let mut out = String::new();
        let mut busy = AHashSet::new();
        self.render_into(&mut out, v, &mut busy)
            .expect("writing to a String cannot fail");
        out
    }

    fn render_into(&self, out: &mut String, v: &Value, busy: &mut AHashSet<Addr>) -> std::fmt::Result {
        match v {
            Value::Any => write!(out, "any"),
            Value::Null => write!(out, "null"),
            Value::Abstract(ty) => write!(out, "<{ty}>"),
            Value::Bool(b) => write!(out, "{b}"),
            Value::Int(i) => write!(out, "{i}"),
            Value::Float(x) => write!(out, "{x}"),
            Value::Str(s) => write!(out, "{s:?}"),
            Value::Taint(label) => write!(out, "taint({label})"),
            Value::Ptr(a) => {
                if busy.insert(*a) {
                    write!(out, "{a}>")?;
                    self.render_into(out, self.get(*a), busy)?;
                    busy.remove(a);
                    Ok(())
                } else {
                    write!(out, "rec{a}")
                }
            }
            Value::Ref(set) => {
                write!(out, "ref{{")?;
                for (i, a) in set.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    self.render_into(out, &Value::Ptr(*a), busy)?;
                }
                write!(out, "}}")
            }
            Value::Record(fields) => self.render_fields(out, "record", fields, busy),
            Value::Object(members) => self.render_fields(out, "object", members, busy),
            Value::Array(elems) => {
                write!(out, "array[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    self.render_into(out, elem, busy)?;
                }
                write!(out, "]")
            }
            Value::Map(m) => {
                write!(out, "map(")?;
                self.render_into(out, &m.key, busy)?;
                write!(out, " => ")?;
                self.render_into(out, &m.elem, busy)?;
                write!(out, ")")
            }
            Value::Method(m) => {
                write!(out, "method{{")?;
                for (i, (id, target)) in m.targets.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    match target {
                        crate::value::Closure::Fun(name) => write!(out, "#{id} {name}")?,
                        crate::value::Closure::Method { class, name } => {
                            write!(out, "#{id} {class}::{name}")?;
                        }
                        crate::value::Closure::Build(class) => write!(out, "#{id} {class}::*BUILD*")?,
                    }
                }
                write!(out, "}}")
            }
            Value::Sum(alts) => {
                write!(out, "sum(")?;
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(out, " | ")?;
                    }
                    self.render_into(out, alt, busy)?;
                }
                write!(out, ")")
            }
        }
    }

    fn render_fields(
        &self,
        out: &mut String,
        tag: &str,
        fields: &indexmap::IndexMap<String, Value>,
        busy: &mut AHashSet<Addr>,
    ) -> std::fmt::Result {
        write!(out, "{tag}{{")?;
        for (i, (name, v)) in fields.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "{name}: ")?;
            self.render_into(out, v, busy)?;
        }
        write!(out, "}}")
    }
}

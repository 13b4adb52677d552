//! Merging of abstract values into sound upper bounds.
//!
//! Control-flow merging in this interpreter is value unification: both sides
//! of a branch write into the same heap, and colliding writes are joined
//! with [`unify`]. The merge rules are ordered; the first applicable rule
//! wins, and anything unrelated falls through to a flat [`Value::Sum`].

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    heap::Heap,
    value::{Addr, AddrSet, MethodVal, Ty, Value, addr_set},
};

/// Merges two values into a sound upper bound, updating the heap in place.
///
/// Convenience wrapper that runs a fresh [`Unifier`]; use the struct
/// directly when several merges should share one visited set.
pub fn unify(heap: &mut Heap, v1: Value, v2: Value) -> Value {
    Unifier::new().unify(heap, v1, v2)
}

/// Outcome of one application of the ordered merge rules: either a single
/// merged value, or the operands handed back for `Sum` folding (the
/// "otherwise" row of the rule table).
enum Merge {
    Merged(Value),
    Unrelated(Value, Value),
}

/// One unification pass over a heap.
///
/// Carries the visited set of address pairs that makes unification
/// terminate on cyclic pointer graphs: re-entering a pair short-circuits
/// and returns one of the inputs.
#[derive(Debug, Default)]
pub struct Unifier {
    seen: AHashSet<(Addr, Addr)>,
}

impl Unifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `v1` and `v2`. The result is above both inputs in the value
    /// order; unrelated inputs produce a flat, deduplicated `Sum`.
    pub fn unify(&mut self, heap: &mut Heap, v1: Value, v2: Value) -> Value {
        match self.merge(heap, v1, v2) {
            Merge::Merged(v) => v,
            Merge::Unrelated(v1, v2) => self.fold_sum(heap, vec![v1, v2]),
        }
    }

    fn merge(&mut self, heap: &mut Heap, v1: Value, v2: Value) -> Merge {
        if v1 == v2 {
            return Merge::Merged(v1);
        }
        Merge::Merged(match (v1, v2) {
            (Value::Any, _) | (_, Value::Any) => Value::Any,
            (Value::Ptr(a), Value::Ptr(b)) => self.unify_addrs(heap, addr_set([a, b])),
            (Value::Ptr(a), Value::Ref(set)) | (Value::Ref(set), Value::Ptr(a)) => {
                let union = addr_set(set.into_iter().chain([a]));
                self.unify_addrs(heap, union)
            }
            (Value::Ref(s1), Value::Ref(s2)) => {
                let union = addr_set(s1.into_iter().chain(s2));
                self.unify_addrs(heap, union)
            }
            (Value::Record(f1), Value::Record(f2)) => Value::Record(self.unify_fields(heap, f1, f2)),
            (Value::Object(m1), Value::Object(m2)) => Value::Object(self.unify_fields(heap, m1, m2)),
            (Value::Method(m1), Value::Method(m2)) => self.unify_methods(heap, *m1, *m2),
            (Value::Map(s1), Value::Map(s2)) => {
                let key = self.unify(heap, s1.key, s2.key);
                let elem = self.unify(heap, s1.elem, s2.elem);
                Value::map(key, elem)
            }
            (Value::Array(e1), Value::Array(e2)) => {
                let m1 = self.widen_array(heap, e1);
                let m2 = self.widen_array(heap, e2);
                return self.merge(heap, m1, m2);
            }
            (Value::Array(elems), Value::Map(s)) | (Value::Map(s), Value::Array(elems)) => {
                let promoted = self.widen_array(heap, elems);
                return self.merge(heap, promoted, Value::Map(s));
            }
            (Value::Record(fields), Value::Map(s)) | (Value::Map(s), Value::Record(fields)) => {
                let promoted = self.widen_record(heap, fields);
                return self.merge(heap, promoted, Value::Map(s));
            }
            (v1, v2) => {
                // literal widening: same-type literals with different
                // content, and literal against the matching abstract type,
                // both lose their content
                let widened = match (&v1, &v2) {
                    (a, b) if a.literal_ty().is_some() && a.literal_ty() == b.literal_ty() => a.literal_ty(),
                    (Value::Abstract(t), b) | (b, Value::Abstract(t)) if b.literal_ty() == Some(*t) => Some(*t),
                    _ => None,
                };
                match widened {
                    Some(t) => Value::Abstract(t),
                    None => return Merge::Unrelated(v1, v2),
                }
            }
        })
    }

    /// Merges the cells behind a set of addresses and widens the pointer to
    /// a multi-target reference. The merged contents are written back to
    /// every member so any alias observes the union.
    fn unify_addrs(&mut self, heap: &mut Heap, union: AddrSet) -> Value {
        if union.len() == 1 {
            return Value::Ptr(union[0]);
        }
        let first = union[0];
        let mut merged = heap.get(first).clone();
        for &a in &union[1..] {
            if !self.seen.insert((first, a)) {
                // cyclic re-entry: keep the pointer, the contents are
                // already being merged further up the stack
                return Value::Ref(union);
            }
            let other = heap.get(a).clone();
            merged = self.unify(heap, merged, other);
        }
        for &a in &union {
            heap.set(a, merged.clone());
        }
        Value::Ref(union)
    }

    /// Field-wise union of two string-keyed maps. Overlapping fields are
    /// unified; a field missing on one side is unified with `Null` (a fresh
    /// `Null` cell when the present side is addressable, so the merged field
    /// stays writable).
    fn unify_fields(
        &mut self,
        heap: &mut Heap,
        f1: IndexMap<String, Value>,
        mut f2: IndexMap<String, Value>,
    ) -> IndexMap<String, Value> {
        let mut out = IndexMap::with_capacity(f1.len() + f2.len());
        for (name, v1) in f1 {
            let merged = match f2.shift_remove(&name) {
                Some(v2) => self.unify(heap, v1, v2),
                None => self.join_with_null(heap, v1),
            };
            out.insert(name, merged);
        }
        // fields only the right side had
        for (name, v2) in f2 {
            let merged = self.join_with_null(heap, v2);
            out.insert(name, merged);
        }
        out
    }

    /// Unifies a one-sided field with `Null`, preserving addressability.
    fn join_with_null(&mut self, heap: &mut Heap, v: Value) -> Value {
        match v {
            Value::Ptr(_) | Value::Ref(_) => {
                let null_cell = heap.new_cell();
                self.unify(heap, v, Value::Ptr(null_cell))
            }
            Value::Method(_) | Value::Null => v,
            other => self.fold_sum(heap, vec![Value::Null, other]),
        }
    }

    /// Merges two method bundles: receivers unify, target maps take the
    /// disjoint-key union. Ids are globally fresh, so a colliding id always
    /// names the same closure.
    fn unify_methods(&mut self, heap: &mut Heap, m1: MethodVal, m2: MethodVal) -> Value {
        let receiver = self.unify(heap, m1.receiver, m2.receiver);
        let mut targets = m1.targets;
        for (id, closure) in m2.targets {
            targets.entry(id).or_insert(closure);
        }
        Value::Method(Box::new(MethodVal { receiver, targets }))
    }

    /// Promotes a positional array to the abstract map form
    /// `Map(<Int>, union of elements)`.
    pub(crate) fn widen_array(&mut self, heap: &mut Heap, elems: Vec<Value>) -> Value {
        let elem = self.union_all(heap, elems);
        let key_cell = heap.alloc(Value::Abstract(Ty::Int));
        Value::map(Value::Ptr(key_cell), elem)
    }

    /// Promotes a record to the abstract map form, widening the keys to the
    /// union of the declared key strings.
    pub(crate) fn widen_record(&mut self, heap: &mut Heap, fields: IndexMap<String, Value>) -> Value {
        let mut keys = Vec::with_capacity(fields.len());
        let mut vals = Vec::with_capacity(fields.len());
        for (name, v) in fields {
            keys.push(Value::Str(name));
            vals.push(v);
        }
        let key = self.union_all(heap, keys);
        let key_cell = heap.alloc(key);
        let elem = self.union_all(heap, vals);
        Value::map(Value::Ptr(key_cell), elem)
    }

    /// Folds a list of values into their unified upper bound. An empty list
    /// yields a fresh `Null` cell so the result stays addressable.
    fn union_all(&mut self, heap: &mut Heap, values: Vec<Value>) -> Value {
        let mut it = values.into_iter();
        match it.next() {
            None => {
                let cell = heap.new_cell();
                Value::Ptr(cell)
            }
            Some(first) => it.fold(first, |acc, v| self.unify(heap, acc, v)),
        }
    }

    /// Normalizes a list of alternatives into a flat `Sum`: nested sums are
    /// flattened, mergeable pairs are collapsed through the merge rules,
    /// and duplicates disappear. A single survivor is returned bare.
    fn fold_sum(&mut self, heap: &mut Heap, items: Vec<Value>) -> Value {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Sum(alts) => flat.extend(alts),
                other => flat.push(other),
            }
        }
        let mut acc: Vec<Value> = Vec::with_capacity(flat.len());
        'next: for item in flat {
            let mut item = item;
            for slot in &mut acc {
                let existing = std::mem::replace(slot, Value::Null);
                match self.merge(heap, existing, item) {
                    Merge::Merged(merged) => {
                        *slot = merged;
                        continue 'next;
                    }
                    Merge::Unrelated(existing, back) => {
                        *slot = existing;
                        item = back;
                    }
                }
            }
            acc.push(item);
        }
        if acc.iter().any(|v| matches!(v, Value::Any)) {
            return Value::Any;
        }
        match acc.len() {
            0 => Value::Null,
            1 => acc.pop().expect("length checked"),
            _ => Value::Sum(acc),
        }
    }
}

/// The value order used by the testable monotonicity property: `leq(a, b)`
/// holds when `b` over-approximates `a`.
///
/// This is a conservative check (false negatives are possible on exotic
/// shapes), which is the safe direction for assertions of the form
/// `leq(input, unify(input, other))`.
#[must_use]
pub fn leq(heap: &Heap, v1: &Value, v2: &Value) -> bool {
    leq_inner(heap, v1, v2, &mut AHashSet::new())
}

fn leq_inner(heap: &Heap, v1: &Value, v2: &Value, seen: &mut AHashSet<(Addr, Addr)>) -> bool {
    if v1 == v2 || matches!(v2, Value::Any) {
        return true;
    }
    match (v1, v2) {
        (Value::Sum(alts), _) => alts.iter().all(|a| leq_inner(heap, a, v2, seen)),
        (_, Value::Sum(alts)) => alts.iter().any(|b| leq_inner(heap, v1, b, seen)),
        (lit, Value::Abstract(t)) if lit.literal_ty() == Some(*t) => true,
        (Value::Ptr(a), Value::Ptr(b)) => {
            // revisiting a pair means the comparison is cyclic; assume it
            // holds and let the enclosing comparison decide
            !seen.insert((*a, *b)) || leq_inner(heap, heap.get(*a), heap.get(*b), seen)
        }
        (Value::Ptr(a), Value::Ref(set)) => {
            set.contains(a)
                || set
                    .first()
                    .is_some_and(|b| !seen.insert((*a, *b)) || leq_inner(heap, heap.get(*a), heap.get(*b), seen))
        }
        (Value::Ref(s1), Value::Ref(s2)) => s1.iter().all(|a| s2.contains(a)),
        // one-sided indirection is transparent for comparison purposes
        (Value::Ptr(a), _) => !seen.insert((*a, *a)) || leq_inner(heap, heap.get(*a), v2, seen),
        (_, Value::Ptr(b)) => !seen.insert((*b, *b)) || leq_inner(heap, v1, heap.get(*b), seen),
        (Value::Record(f1), Value::Record(f2)) | (Value::Object(f1), Value::Object(f2)) => f1
            .iter()
            .all(|(name, a)| f2.get(name).is_some_and(|b| leq_inner(heap, a, b, seen))),
        (Value::Map(s1), Value::Map(s2)) => {
            leq_inner(heap, &s1.key, &s2.key, seen) && leq_inner(heap, &s1.elem, &s2.elem, seen)
        }
        (Value::Array(elems), Value::Map(s)) => elems.iter().all(|e| leq_inner(heap, e, &s.elem, seen)),
        (Value::Record(fields), Value::Map(s)) => fields.iter().all(|(name, v)| {
            leq_inner(heap, &Value::Str(name.clone()), &s.key, seen) && leq_inner(heap, v, &s.elem, seen)
        }),
        _ => false,
    }
}

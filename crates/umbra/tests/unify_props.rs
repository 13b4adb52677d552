//! Lattice properties of the unifier: idempotence, monotonicity, sum
//! normalization, widening, and termination on cyclic heaps.

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use umbra::{Closure, Heap, Ty, Value, find_taint, leq, unify};

/// A mixed corpus of values, some backed by heap cells.
fn corpus(heap: &mut Heap) -> Vec<Value> {
    let a = heap.alloc(Value::Int(1));
    let b = heap.alloc(Value::Str("s".to_owned()));
    let mut record = IndexMap::new();
    record.insert("k".to_owned(), Value::Int(1));
    vec![
        Value::Any,
        Value::Null,
        Value::Bool(true),
        Value::Int(42),
        Value::Float(1.5),
        Value::Str("x".to_owned()),
        Value::Abstract(Ty::Int),
        Value::Abstract(Ty::String),
        Value::Ptr(a),
        Value::Ptr(b),
        Value::Record(record),
        Value::Array(vec![Value::Int(1), Value::Int(2)]),
        Value::map(Value::Abstract(Ty::Int), Value::Abstract(Ty::String)),
        Value::Sum(vec![Value::Null, Value::Abstract(Ty::Int)]),
        Value::Taint("$_GET".to_owned()),
    ]
}

/// No `Sum` nests another `Sum`, and every `Sum` has at least two
/// alternatives.
fn assert_flat(v: &Value) {
    if let Value::Sum(alts) = v {
        assert!(alts.len() >= 2, "Sum with fewer than two alternatives: {v:?}");
        for alt in alts {
            assert!(!matches!(alt, Value::Sum(_)), "nested Sum: {v:?}");
        }
        // no structural duplicates either
        for (i, x) in alts.iter().enumerate() {
            for y in &alts[i + 1..] {
                assert_ne!(x, y, "duplicate Sum alternative: {v:?}");
            }
        }
    }
}

// =============================================================================
// 1. Algebraic properties
// =============================================================================

/// `unify(v, v) = v` up to structural equality.
#[test]
fn unification_is_idempotent() {
    let mut heap = Heap::new();
    for v in corpus(&mut heap) {
        let out = unify(&mut heap, v.clone(), v.clone());
        assert_eq!(out, v, "idempotence broken for {v:?}");
    }
}

/// The merge result is above both inputs in the value order.
#[test]
fn unification_is_monotonic() {
    let mut heap = Heap::new();
    let values = corpus(&mut heap);
    for v1 in &values {
        for v2 in &values {
            let out = unify(&mut heap, v1.clone(), v2.clone());
            assert!(
                leq(&heap, v1, &out),
                "unify({v1:?}, {v2:?}) = {out:?} is not above the left input"
            );
            assert!(
                leq(&heap, v2, &out),
                "unify({v1:?}, {v2:?}) = {out:?} is not above the right input"
            );
            assert_flat(&out);
        }
    }
}

/// `Any` absorbs everything.
#[test]
fn any_is_top() {
    let mut heap = Heap::new();
    for v in corpus(&mut heap) {
        assert_eq!(unify(&mut heap, Value::Any, v.clone()), Value::Any);
        assert_eq!(unify(&mut heap, v, Value::Any), Value::Any);
    }
}

// =============================================================================
// 2. Widening rules
// =============================================================================

/// Same-type literals with different content widen to the abstract type;
/// a literal against its abstract type does too.
#[test]
fn literal_widening() {
    let mut heap = Heap::new();
    assert_eq!(
        unify(&mut heap, Value::Int(1), Value::Int(2)),
        Value::Abstract(Ty::Int)
    );
    assert_eq!(
        unify(&mut heap, Value::Str("a".to_owned()), Value::Abstract(Ty::String)),
        Value::Abstract(Ty::String)
    );
    // unrelated types fall through to a Sum
    let out = unify(&mut heap, Value::Int(1), Value::Str("a".to_owned()));
    assert_eq!(out, Value::Sum(vec![Value::Int(1), Value::Str("a".to_owned())]));
}

/// Two pointers widen to a multi-target reference with merged contents
/// written back to every member.
#[test]
fn pointer_union_merges_cells() {
    let mut heap = Heap::new();
    let a = heap.alloc(Value::Int(1));
    let b = heap.alloc(Value::Int(2));
    let out = unify(&mut heap, Value::Ptr(a), Value::Ptr(b));
    let Value::Ref(set) = &out else {
        panic!("expected Ref, got {out:?}");
    };
    assert_eq!(set.len(), 2);
    assert_eq!(heap.get(a), &Value::Abstract(Ty::Int));
    assert_eq!(heap.get(b), &Value::Abstract(Ty::Int));
}

/// Record union: overlap unifies, one-sided fields admit `Null`.
#[test]
fn record_union_is_field_wise() {
    let mut heap = Heap::new();
    let mut f1 = IndexMap::new();
    f1.insert("shared".to_owned(), Value::Int(1));
    f1.insert("left".to_owned(), Value::Str("l".to_owned()));
    let mut f2 = IndexMap::new();
    f2.insert("shared".to_owned(), Value::Int(9));
    f2.insert("right".to_owned(), Value::Bool(true));

    let out = unify(&mut heap, Value::Record(f1), Value::Record(f2));
    let Value::Record(fields) = &out else {
        panic!("expected Record, got {out:?}");
    };
    assert_eq!(fields.get("shared"), Some(&Value::Abstract(Ty::Int)));
    assert_eq!(
        fields.get("left"),
        Some(&Value::Sum(vec![Value::Null, Value::Str("l".to_owned())]))
    );
    assert_eq!(
        fields.get("right"),
        Some(&Value::Sum(vec![Value::Null, Value::Bool(true)]))
    );
}

/// Arrays promote to the abstract map under unification.
#[test]
fn array_union_promotes_to_map() {
    let mut heap = Heap::new();
    let a1 = heap.alloc(Value::Int(1));
    let a2 = heap.alloc(Value::Int(2));
    let a3 = heap.alloc(Value::Int(3));
    let out = unify(
        &mut heap,
        Value::Array(vec![Value::Ptr(a1)]),
        Value::Array(vec![Value::Ptr(a2), Value::Ptr(a3)]),
    );
    let Value::Map(summary) = &out else {
        panic!("expected Map, got {out:?}");
    };
    assert_eq!(heap.resolve(&summary.key), Value::Abstract(Ty::Int));
    assert_eq!(heap.resolve(&summary.elem), Value::Abstract(Ty::Int));
}

/// Maps unify component-wise.
#[test]
fn map_union_is_component_wise() {
    let mut heap = Heap::new();
    let m1 = Value::map(Value::Abstract(Ty::Int), Value::Int(1));
    let m2 = Value::map(Value::Abstract(Ty::Int), Value::Str("s".to_owned()));
    let out = unify(&mut heap, m1, m2);
    let Value::Map(summary) = &out else {
        panic!("expected Map, got {out:?}");
    };
    assert_eq!(summary.key, Value::Abstract(Ty::Int));
    assert_eq!(
        summary.elem,
        Value::Sum(vec![Value::Int(1), Value::Str("s".to_owned())])
    );
}

/// Method bundles take the disjoint-key union of their targets.
#[test]
fn method_union_keeps_distinct_targets() {
    let mut heap = Heap::new();
    let m1 = Value::method(Value::Null, 1, Closure::Fun("a".to_owned()));
    let m2 = Value::method(Value::Null, 2, Closure::Fun("b".to_owned()));
    let out = unify(&mut heap, m1, m2);
    let Value::Method(bundle) = &out else {
        panic!("expected Method, got {out:?}");
    };
    assert_eq!(bundle.targets.len(), 2);
}

/// Taint stays visible through unification with ordinary values.
#[test]
fn taint_survives_union() {
    let mut heap = Heap::new();
    let out = unify(
        &mut heap,
        Value::Str("x".to_owned()),
        Value::Taint("$_GET".to_owned()),
    );
    assert_flat(&out);
    assert_eq!(find_taint(&heap, &out).as_deref(), Some("$_GET"));
}

// =============================================================================
// 3. Termination and heap integrity
// =============================================================================

/// Unifying two cyclic pointer structures terminates.
#[test]
fn cyclic_heaps_terminate() {
    let mut heap = Heap::new();
    let a = heap.new_cell();
    let b = heap.new_cell();
    heap.set(a, Value::Ptr(b));
    heap.set(b, Value::Ptr(a));
    let c = heap.new_cell();
    let d = heap.new_cell();
    heap.set(c, Value::Ptr(d));
    heap.set(d, Value::Ptr(c));

    let out = unify(&mut heap, Value::Ptr(a), Value::Ptr(c));
    assert!(matches!(out, Value::Ref(_)), "expected Ref, got {out:?}");
    // the printer also terminates on what we just built
    let rendered = heap.render(&out);
    assert!(!rendered.is_empty());
}

/// Every address reachable from a unification result exists in the heap.
#[test]
fn results_only_reference_live_addresses() {
    let mut heap = Heap::new();
    let values = corpus(&mut heap);
    let mut results = Vec::new();
    for v1 in &values {
        for v2 in &values {
            results.push(unify(&mut heap, v1.clone(), v2.clone()));
        }
    }
    for out in &results {
        let mut addrs = Vec::new();
        out.direct_addrs(&mut addrs);
        for addr in addrs {
            assert!(
                addr.index() < heap.len(),
                "dangling address {addr} in {out:?} (heap size {})",
                heap.len()
            );
        }
    }
}

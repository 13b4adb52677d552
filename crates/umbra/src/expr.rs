//! Expression evaluation.
//!
//! Every case takes the heap by `&mut` and produces a value; reference-
//! producing expressions go through [`Interp::lvalue`], which yields the
//! address-carrying pointer instead. Assignment writes through the pointer
//! with a one-level descent, which is what makes the two-level variable
//! cells of the environment behave like by-reference aliases.

use ahash::AHashSet;

use crate::{
    ast::{ArrayEntry, BinOp, Expr, UnOp},
    env::{ARRAY_VAR, CLASS_MEMBER, is_variable},
    error::{InterpError, InterpResult},
    heap::Heap,
    run::Interp,
    taint::{TaintHook, find_taint},
    tracer::AnalysisTracer,
    unify::{Unifier, unify},
    value::{Addr, MapSummary, Ty, Value},
};

impl<T: TaintHook, Tr: AnalysisTracer> Interp<'_, T, Tr> {
    /// Evaluates an expression to a value, threading the heap.
    pub(crate) fn expr(&mut self, heap: &mut Heap, e: &Expr) -> InterpResult<Value> {
        if self.taint.enabled()
            && let Some(v) = self.taint.intercept(heap, e)
        {
            return Ok(v);
        }
        match e {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(x) => Ok(Value::Float(*x)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::InterpString(parts) => {
                let mut vals = Vec::with_capacity(parts.len());
                for part in parts {
                    let v = self.expr(heap, part)?;
                    vals.push(heap.resolve(&v));
                }
                Ok(self.taint.fold_segments(heap, &vals))
            }
            Expr::Var(name) => self.var_value(heap, name),
            Expr::Id(name) if is_variable(name) => self.var_value(heap, name),
            Expr::Id(name) => self.constant_value(heap, name),
            Expr::Unop(op, operand) => {
                let v = self.expr(heap, operand)?;
                Ok(unop_value(*op, &heap.resolve(&v)))
            }
            Expr::Binop(op, l, r) => {
                let lv = self.expr(heap, l)?;
                let rv = self.expr(heap, r)?;
                let lv = heap.resolve(&lv);
                let rv = heap.resolve(&rv);
                Ok(self.binop_value(heap, *op, &lv, &rv))
            }
            Expr::Cond(cond, then, other) => {
                let _ = self.expr(heap, cond)?;
                let tv = self.expr(heap, then)?;
                let ov = self.expr(heap, other)?;
                Ok(unify(heap, tv, ov))
            }
            Expr::Assign(None, lhs, rhs) => self.assign_expr(heap, lhs, rhs),
            Expr::Assign(Some(op), lhs, rhs) => {
                let (fresh, ptr) = self.lvalue(heap, lhs)?;
                let cur = heap.resolve(&read_ptr(heap, &ptr));
                let rv = self.expr(heap, rhs)?;
                let rv = heap.resolve(&rv);
                let combined = self.binop_value(heap, *op, &cur, &rv);
                self.assign(heap, fresh, &ptr, combined)
            }
            Expr::List(_) => Err(InterpError::Impossible(
                "destructuring list outside assignment".to_owned(),
            )),
            Expr::Call(callee, args) => self.call_expr(heap, callee, args),
            Expr::New(class, args) => self.new_expr(heap, class, args),
            Expr::ObjGet(..) | Expr::ClassGet(..) | Expr::ArrayGet(..) => {
                let (_, ptr) = self.lvalue(heap, e)?;
                Ok(read_ptr(heap, &ptr))
            }
            Expr::ConsArray(entries) => self.cons_array(heap, entries),
            Expr::Ref(inner) => {
                let (_, ptr) = self.lvalue(heap, inner)?;
                Ok(read_ptr_shallow(heap, &ptr))
            }
            Expr::Cast(ty, inner) => {
                let v = self.expr(heap, inner)?;
                let v = heap.resolve(&v);
                // a cast to string keeps attacker data attacker-controlled;
                // numeric casts sanitize
                if *ty == Ty::String
                    && let Some(label) = find_taint(heap, &v)
                {
                    return Ok(Value::Taint(label));
                }
                Ok(Value::Abstract(*ty))
            }
            Expr::InstanceOf(l, r) => {
                let _ = self.expr(heap, l)?;
                let _ = self.expr(heap, r)?;
                Ok(Value::Abstract(Ty::Bool))
            }
            Expr::IncrDecr { target, .. } => {
                // the numeric effect is deliberately not modeled
                self.expr(heap, target)
            }
            Expr::Lambda(_) => Ok(Value::Any),
            Expr::Xhp(xml) => {
                for (_, attr) in &xml.attrs {
                    let _ = self.expr(heap, attr)?;
                }
                for child in &xml.children {
                    let _ = self.expr(heap, child)?;
                }
                Ok(Value::Abstract(Ty::Xhp))
            }
        }
    }

    /// Resolves a reference-producing expression to `(fresh, ptr)`. `ptr`
    /// is a `Ptr` (or `Ref`) whose target is the location to read or write;
    /// `fresh` reports that the location was created by this resolution and
    /// still holds `Null`.
    pub(crate) fn lvalue(&mut self, heap: &mut Heap, e: &Expr) -> InterpResult<(bool, Value)> {
        match e {
            Expr::Var(name) => self.var_lvalue(heap, name),
            Expr::Id(name) if is_variable(name) => self.var_lvalue(heap, name),
            Expr::ArrayGet(base, key) => {
                let (_, base_ptr) = self.lvalue(heap, base)?;
                let key_v = match key {
                    Some(k) => {
                        let v = self.expr(heap, k)?;
                        Some(heap.resolve(&v))
                    }
                    None => None,
                };
                self.index_lvalue(heap, &base_ptr, key_v)
            }
            Expr::ObjGet(obj, member) => self.member_lvalue(heap, obj, member, false),
            Expr::ClassGet(class, member) => self.class_member_lvalue(heap, class, member),
            // anything else evaluates into a fresh cell; the caller gets an
            // addressable copy rather than an error
            other => {
                let v = self.expr(heap, other)?;
                let cell = heap.alloc(v);
                Ok((true, Value::Ptr(cell)))
            }
        }
    }

    /// Variable lookup in l-value position. Source names materialize their
    /// tainted map summary on first touch.
    pub(crate) fn var_lvalue(&mut self, heap: &mut Heap, name: &str) -> InterpResult<(bool, Value)> {
        if self.env.lookup(name).is_none()
            && let Some(source) = self.taint.source_value(heap, name)
        {
            let value_cell = heap.alloc(source);
            let var_cell = heap.alloc(Value::Ptr(value_cell));
            self.env.bind_global(name, var_cell);
            return Ok((false, Value::Ptr(var_cell)));
        }
        Ok(self.env.var_get(heap, name))
    }

    /// Variable read: resolve the binding and read through both levels of
    /// indirection.
    fn var_value(&mut self, heap: &mut Heap, name: &str) -> InterpResult<Value> {
        let (_, ptr) = self.var_lvalue(heap, name)?;
        Ok(read_ptr(heap, &ptr))
    }

    /// Constant reference: resolved via the code database; in non-strict
    /// mode an unknown constant over-approximates to `Any`.
    fn constant_value(&mut self, heap: &mut Heap, name: &str) -> InterpResult<Value> {
        match self.env.db.constant(name) {
            Some(def) => {
                let def = def.clone();
                self.expr(heap, &def)
            }
            None if self.opts.strict => Err(InterpError::UnknownConstant(name.to_owned())),
            None => Ok(Value::Any),
        }
    }

    /// Plain assignment, including destructuring lists and reference
    /// aliasing on the right-hand side.
    fn assign_expr(&mut self, heap: &mut Heap, lhs: &Expr, rhs: &Expr) -> InterpResult<Value> {
        if let Expr::List(items) = lhs {
            let rv = self.expr(heap, rhs)?;
            self.destructure(heap, items, &rv)?;
            return Ok(rv);
        }
        if let Expr::Ref(inner) = rhs {
            // $a = &$b: make both first-level cells point at the same value
            // cell
            let (_, lptr) = self.lvalue(heap, lhs)?;
            let (_, rptr) = self.lvalue(heap, inner)?;
            if let (Value::Ptr(a1), Value::Ptr(b1)) = (&lptr, &rptr) {
                let shared = heap.get(*b1).clone();
                heap.set(*a1, shared.clone());
                return Ok(shared);
            }
            let rv = read_ptr(heap, &rptr);
            return self.assign(heap, false, &lptr, rv);
        }
        let (fresh, ptr) = self.lvalue(heap, lhs)?;
        let rv = self.expr(heap, rhs)?;
        self.assign(heap, fresh, &ptr, rv)
    }

    /// Stores `rhs` through an l-value pointer. A fresh location takes the
    /// value as-is; an existing one is unified with it, so merged control
    /// flow only ever widens.
    pub(crate) fn assign(&mut self, heap: &mut Heap, fresh: bool, ptr: &Value, rhs: Value) -> InterpResult<Value> {
        match ptr {
            Value::Ptr(a) => Ok(write_through(heap, *a, fresh, rhs)),
            Value::Ref(set) => {
                // multi-target writes are always weak
                let mut out = Value::Null;
                for a in set {
                    out = write_through(heap, *a, false, rhs.clone());
                }
                Ok(out)
            }
            _ => Ok(rhs),
        }
    }

    /// Destructuring: `list($a, $b) = $e` becomes indexed assignments from
    /// the same right-hand side.
    fn destructure(&mut self, heap: &mut Heap, items: &[Expr], rv: &Value) -> InterpResult<()> {
        let resolved = heap.resolve(rv);
        for (i, item) in items.iter().enumerate() {
            let elem = element_at(heap, &resolved, i);
            match item {
                Expr::List(nested) => self.destructure(heap, nested, &elem)?,
                _ => {
                    let (fresh, ptr) = self.lvalue(heap, item)?;
                    self.assign(heap, fresh, &ptr, elem)?;
                }
            }
        }
        Ok(())
    }

    /// Array construction through the `*array*` scratch accumulator: each
    /// entry is inserted via the ordinary index machinery, then the scratch
    /// binding is dropped.
    fn cons_array(&mut self, heap: &mut Heap, entries: &[ArrayEntry]) -> InterpResult<Value> {
        if entries.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        // nested constructions reuse the scratch name
        let saved = self.env.unbind(ARRAY_VAR);
        let result = self.cons_array_inner(heap, entries);
        self.env.unbind(ARRAY_VAR);
        if let Some(addr) = saved {
            self.env.bind(ARRAY_VAR, addr);
        }
        result
    }

    fn cons_array_inner(&mut self, heap: &mut Heap, entries: &[ArrayEntry]) -> InterpResult<Value> {
        for entry in entries {
            let (_, base_ptr) = self.var_lvalue(heap, ARRAY_VAR)?;
            let key_v = match &entry.key {
                Some(k) => {
                    let v = self.expr(heap, k)?;
                    Some(heap.resolve(&v))
                }
                None => None,
            };
            let (fresh, slot) = self.index_lvalue(heap, &base_ptr, key_v)?;
            let v = self.expr(heap, &entry.value)?;
            self.assign(heap, fresh, &slot, v)?;
        }
        let (_, ptr) = self.var_lvalue(heap, ARRAY_VAR)?;
        Ok(read_ptr(heap, &ptr))
    }

    /// Index access in l-value position. The container is vivified on first
    /// touch: integer keys make an `Array`, string keys a `Record`, and any
    /// key collision or abstract key collapses the container to a `Map`.
    pub(crate) fn index_lvalue(
        &mut self,
        heap: &mut Heap,
        base_ptr: &Value,
        key: Option<Value>,
    ) -> InterpResult<(bool, Value)> {
        let Some(ca) = container_cell(heap, base_ptr) else {
            return Ok((true, Value::Ptr(heap.alloc(Value::Any))));
        };
        loop {
            match heap.get(ca).clone() {
                Value::Null => {
                    let vivified = match &key {
                        None | Some(Value::Int(_)) => Value::Array(Vec::new()),
                        Some(Value::Str(_)) => Value::Record(indexmap::IndexMap::new()),
                        Some(other) => {
                            let kc = heap.alloc(other.clone());
                            let ec = heap.new_cell();
                            Value::Map(Box::new(MapSummary {
                                key: Value::Ptr(kc),
                                elem: Value::Ptr(ec),
                            }))
                        }
                    };
                    heap.set(ca, vivified);
                }
                Value::Array(mut elems) => {
                    let len = i64::try_from(elems.len()).unwrap_or(i64::MAX);
                    match &key {
                        None => {
                            let cell = heap.new_cell();
                            elems.push(Value::Ptr(cell));
                            heap.set(ca, Value::Array(elems));
                            return Ok((true, Value::Ptr(cell)));
                        }
                        Some(Value::Int(i)) if (0..len).contains(i) => {
                            let slot = elems[usize::try_from(*i).expect("index in range")].clone();
                            return Ok((false, slot));
                        }
                        Some(Value::Int(i)) if *i == len => {
                            let cell = heap.new_cell();
                            elems.push(Value::Ptr(cell));
                            heap.set(ca, Value::Array(elems));
                            return Ok((true, Value::Ptr(cell)));
                        }
                        Some(_) => {
                            let widened = Unifier::new().widen_array(heap, elems);
                            heap.set(ca, widened);
                        }
                    }
                }
                Value::Record(mut fields) => match &key {
                    Some(Value::Str(name)) => {
                        if let Some(slot) = fields.get(name) {
                            return Ok((false, slot.clone()));
                        }
                        let cell = heap.new_cell();
                        fields.insert(name.clone(), Value::Ptr(cell));
                        heap.set(ca, Value::Record(fields));
                        return Ok((true, Value::Ptr(cell)));
                    }
                    _ => {
                        let widened = Unifier::new().widen_record(heap, fields);
                        heap.set(ca, widened);
                    }
                },
                Value::Map(mut summary) => {
                    if let Some(kv) = key {
                        summary.key = merge_into_summary(heap, summary.key, kv);
                    }
                    let elem = summary.elem.clone();
                    if matches!(elem, Value::Ptr(_) | Value::Ref(_)) {
                        heap.set(ca, Value::Map(summary));
                        return Ok((false, elem));
                    }
                    // keep the element summary addressable
                    let cell = heap.alloc(elem);
                    summary.elem = Value::Ptr(cell);
                    heap.set(ca, Value::Map(summary));
                    return Ok((false, Value::Ptr(cell)));
                }
                Value::Taint(label) => {
                    let cell = heap.alloc(Value::Taint(label));
                    return Ok((true, Value::Ptr(cell)));
                }
                _ => {
                    // Any, Sum, Object, scalars: no per-key structure to
                    // offer, over-approximate the slot
                    let cell = heap.alloc(Value::Any);
                    return Ok((true, Value::Ptr(cell)));
                }
            }
        }
    }

    /// Member access in l-value position, shared by `ObjGet` and (through
    /// [`Self::class_member_lvalue`]) `ClassGet`.
    pub(crate) fn member_lvalue(
        &mut self,
        heap: &mut Heap,
        obj: &Expr,
        member: &Expr,
        class_scope: bool,
    ) -> InterpResult<(bool, Value)> {
        let (_, base_ptr) = if class_scope {
            let ptr = self.class_object_ptr(heap, obj)?;
            (false, ptr)
        } else {
            self.lvalue(heap, obj)?
        };
        let Some(name) = self.member_name(heap, member)? else {
            return Ok((true, Value::Ptr(heap.alloc(Value::Any))));
        };
        self.member_of_ptr(heap, &base_ptr, &name)
    }

    pub(crate) fn member_of_ptr(&mut self, heap: &mut Heap, base_ptr: &Value, name: &str) -> InterpResult<(bool, Value)> {
        let Some(ca) = container_cell(heap, base_ptr) else {
            return Ok((true, Value::Ptr(heap.alloc(Value::Any))));
        };
        match heap.get(ca).clone() {
            Value::Object(mut members) => {
                match members.get(name).cloned() {
                    Some(slot @ (Value::Ptr(_) | Value::Ref(_))) => Ok((false, slot)),
                    Some(method @ Value::Method(_)) => {
                        // methods are not addressable storage; hand back a
                        // detached cell so reads still see the bundle
                        let cell = heap.alloc(method);
                        Ok((false, Value::Ptr(cell)))
                    }
                    Some(other) => {
                        let cell = heap.alloc(other);
                        members.insert(name.to_owned(), Value::Ptr(cell));
                        heap.set(ca, Value::Object(members));
                        Ok((false, Value::Ptr(cell)))
                    }
                    None if self.opts.strict && name != "__construct" => Err(InterpError::UnknownMethod {
                        name: name.to_owned(),
                        class: class_of(heap, &members),
                        candidates: members.keys().filter(|k| !k.starts_with('*')).cloned().collect(),
                    }),
                    None => {
                        // implicit field creation
                        let cell = heap.new_cell();
                        members.insert(name.to_owned(), Value::Ptr(cell));
                        heap.set(ca, Value::Object(members));
                        Ok((true, Value::Ptr(cell)))
                    }
                }
            }
            Value::Taint(label) => Ok((true, Value::Ptr(heap.alloc(Value::Taint(label))))),
            Value::Any | Value::Sum(_) => Ok((true, Value::Ptr(heap.alloc(Value::Any)))),
            other if self.opts.strict => Err(InterpError::UnknownObject(format!(
                "{} has no member {name}",
                other.variant_name()
            ))),
            _ => Ok((true, Value::Ptr(heap.alloc(Value::Any)))),
        }
    }

    fn class_member_lvalue(&mut self, heap: &mut Heap, class: &Expr, member: &Expr) -> InterpResult<(bool, Value)> {
        self.member_lvalue(heap, class, member, true)
    }

    /// Extracts a member name: a bare identifier, a variable holding a
    /// string, or any expression narrowing to a string literal. `None`
    /// means the name could not be narrowed (over-approximated upstream).
    pub(crate) fn member_name(&mut self, heap: &mut Heap, member: &Expr) -> InterpResult<Option<String>> {
        match member {
            Expr::Id(name) | Expr::Str(name) => Ok(Some(name.clone())),
            Expr::Var(name) if is_variable(name) => {
                let v = self.var_value(heap, name)?;
                match heap.resolve(&v) {
                    Value::Str(s) => Ok(Some(s)),
                    _ => Ok(None),
                }
            }
            other => {
                let v = self.expr(heap, other)?;
                match heap.resolve(&v) {
                    Value::Str(s) => Ok(Some(s)),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Binary operators on resolved values.
    pub(crate) fn binop_value(&mut self, heap: &mut Heap, op: BinOp, l: &Value, r: &Value) -> Value {
        if op == BinOp::Concat {
            return self.taint.concat(heap, l, r);
        }
        if op.is_logical() {
            return Value::Abstract(Ty::Bool);
        }
        if l.is_int_shaped() && r.is_int_shaped() {
            Value::Abstract(Ty::Int)
        } else {
            Value::Sum(vec![Value::Null, Value::Abstract(Ty::Int)])
        }
    }
}

/// Unary operators: precise on literals, type-preserving on abstract
/// operands, a null-or-typed sum on anything unrelated.
fn unop_value(op: UnOp, v: &Value) -> Value {
    match (op, v) {
        (UnOp::Neg, Value::Int(i)) => Value::Int(-i),
        (UnOp::Neg, Value::Float(x)) => Value::Float(-x),
        (UnOp::Neg, Value::Abstract(t @ (Ty::Int | Ty::Float))) => Value::Abstract(*t),
        (UnOp::Neg, _) => Value::Sum(vec![Value::Null, Value::Abstract(Ty::Int)]),
        (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnOp::Not, Value::Abstract(Ty::Bool)) => Value::Abstract(Ty::Bool),
        (UnOp::Not, _) => Value::Sum(vec![Value::Null, Value::Abstract(Ty::Bool)]),
        (UnOp::BitNot, Value::Int(i)) => Value::Int(!i),
        (UnOp::BitNot, Value::Abstract(Ty::Int)) => Value::Abstract(Ty::Int),
        (UnOp::BitNot, _) => Value::Sum(vec![Value::Null, Value::Abstract(Ty::Int)]),
    }
}

/// Reads through an l-value pointer with the same one-level descent that
/// assignment uses: the pointed-to cell usually holds a second `Ptr` to the
/// value cell.
pub(crate) fn read_ptr(heap: &Heap, ptr: &Value) -> Value {
    let addr = match ptr {
        Value::Ptr(a) => *a,
        Value::Ref(set) if !set.is_empty() => set[0],
        other => return other.clone(),
    };
    match heap.get(addr) {
        Value::Ptr(a2) => heap.get(*a2).clone(),
        Value::Ref(set) if !set.is_empty() => heap.get(set[0]).clone(),
        v => v.clone(),
    }
}

/// Reads one level only: the contents of the first cell behind the
/// pointer. Used by `&$x`, where the interesting value *is* the inner
/// pointer.
fn read_ptr_shallow(heap: &Heap, ptr: &Value) -> Value {
    match ptr {
        Value::Ptr(a) => heap.get(*a).clone(),
        other => other.clone(),
    }
}

/// Writes `rhs` through the cell at `addr`, descending one pointer level
/// (the two-level variable model). Non-fresh writes unify with the old
/// contents.
fn write_through(heap: &mut Heap, addr: Addr, fresh: bool, rhs: Value) -> Value {
    match heap.get(addr).clone() {
        Value::Ptr(a2) => write_cell(heap, a2, fresh, rhs),
        Value::Ref(set) => {
            let mut out = Value::Null;
            for a2 in set {
                out = write_cell(heap, a2, false, rhs.clone());
            }
            out
        }
        _ => write_cell(heap, addr, fresh, rhs),
    }
}

fn write_cell(heap: &mut Heap, addr: Addr, fresh: bool, rhs: Value) -> Value {
    let stored = if fresh {
        rhs
    } else {
        let old = heap.get(addr).clone();
        unify(heap, old, rhs)
    };
    heap.set(addr, stored.clone());
    stored
}

/// Follows pointer indirection from an l-value pointer down to the cell
/// that holds (or will hold) the container itself.
pub(crate) fn container_cell(heap: &Heap, ptr: &Value) -> Option<Addr> {
    let mut cur = match ptr {
        Value::Ptr(a) => *a,
        Value::Ref(set) => *set.first()?,
        _ => return None,
    };
    let mut seen = AHashSet::new();
    seen.insert(cur);
    loop {
        match heap.get(cur) {
            Value::Ptr(a) if seen.insert(*a) => cur = *a,
            Value::Ref(set) => match set.first() {
                Some(a) if seen.insert(*a) => cur = *a,
                _ => return Some(cur),
            },
            _ => return Some(cur),
        }
    }
}

/// Merges a freshly observed key into a map's key summary, writing through
/// the summary cell when it is addressable.
fn merge_into_summary(heap: &mut Heap, summary: Value, observed: Value) -> Value {
    match summary {
        Value::Ptr(a) => {
            let old = heap.get(a).clone();
            let merged = unify(heap, old, observed);
            heap.set(a, merged);
            Value::Ptr(a)
        }
        other => unify(heap, other, observed),
    }
}

/// Positional element extraction for destructuring.
fn element_at(heap: &Heap, collection: &Value, index: usize) -> Value {
    match collection {
        Value::Array(elems) => elems.get(index).map_or(Value::Null, |slot| heap.resolve(slot)),
        Value::Map(summary) => heap.resolve(&summary.elem),
        Value::Taint(label) => Value::Taint(label.clone()),
        Value::Any => Value::Any,
        _ => Value::Null,
    }
}

/// The class name recorded in an object's hidden member, for error
/// messages.
fn class_of(heap: &Heap, members: &indexmap::IndexMap<String, Value>) -> String {
    members
        .get(CLASS_MEMBER)
        .map(|v| heap.resolve(v))
        .and_then(|v| match v {
            Value::Str(s) => Some(s),
            _ => None,
        })
        .unwrap_or_else(|| "<object>".to_owned())
}

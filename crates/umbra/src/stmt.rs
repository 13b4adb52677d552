//! Statement evaluation.
//!
//! Control-flow merging is flow-insensitive: both arms of a conditional are
//! evaluated in sequence against the same heap, and loops run their
//! condition and body exactly once. The abstract domain is a monotone
//! lattice and values only grow under unification, so a sound
//! over-approximation does not need a fixed point here.

use ahash::AHashSet;

use crate::{
    ast::{Expr, Stmt},
    env::RETURN_VAR,
    error::{InterpError, InterpResult},
    heap::Heap,
    run::Interp,
    taint::TaintHook,
    tracer::AnalysisTracer,
    unify::Unifier,
    value::{Ty, Value},
};

impl<T: TaintHook, Tr: AnalysisTracer> Interp<'_, T, Tr> {
    pub(crate) fn stmts(&mut self, heap: &mut Heap, stmts: &[Stmt]) -> InterpResult<()> {
        for s in stmts {
            self.stmt(heap, s)?;
        }
        Ok(())
    }

    pub(crate) fn stmt(&mut self, heap: &mut Heap, s: &Stmt) -> InterpResult<()> {
        match s {
            Stmt::Expr(e) => {
                let _ = self.expr(heap, e)?;
                Ok(())
            }
            Stmt::Block(body) => self.stmts(heap, body),
            Stmt::If(cond, then, other) => {
                let _ = self.expr(heap, cond)?;
                self.null_prepass(heap, &[then.as_slice(), other.as_slice()]);
                self.stmts(heap, then)?;
                self.stmts(heap, other)
            }
            Stmt::While(cond, body) => {
                let _ = self.expr(heap, cond)?;
                self.stmts(heap, body)
            }
            Stmt::Do(body, cond) => {
                self.stmts(heap, body)?;
                let _ = self.expr(heap, cond)?;
                Ok(())
            }
            Stmt::For(init, cond, step, body) => {
                for e in init.iter().chain(cond).chain(step) {
                    let _ = self.expr(heap, e)?;
                }
                self.stmts(heap, body)
            }
            Stmt::Foreach {
                collection,
                key,
                value,
                body,
            } => {
                let cv = self.expr(heap, collection)?;
                let cv = heap.resolve(&cv);
                let (ksum, vsum) = self.collection_summary(heap, &cv);
                if let Some(kpat) = key {
                    let (fresh, ptr) = self.lvalue(heap, kpat)?;
                    self.assign(heap, fresh, &ptr, ksum)?;
                }
                match value {
                    Expr::List(items) => {
                        // element destructuring takes the element summary
                        // positionally
                        for item in items {
                            let (fresh, ptr) = self.lvalue(heap, item)?;
                            self.assign(heap, fresh, &ptr, vsum.clone())?;
                        }
                    }
                    _ => {
                        let (fresh, ptr) = self.lvalue(heap, value)?;
                        self.assign(heap, fresh, &ptr, vsum)?;
                    }
                }
                self.stmts(heap, body)
            }
            Stmt::Switch(scrutinee, cases) => {
                let _ = self.expr(heap, scrutinee)?;
                let bodies: Vec<&[Stmt]> = cases.iter().map(|c| c.body.as_slice()).collect();
                self.null_prepass(heap, &bodies);
                for case in cases {
                    if let Some(guard) = &case.guard {
                        let _ = self.expr(heap, guard)?;
                    }
                    self.stmts(heap, &case.body)?;
                }
                Ok(())
            }
            Stmt::Return(e) => {
                let v = match e {
                    Some(e) => self.expr(heap, e)?,
                    None => Value::Null,
                };
                let (fresh, ptr) = self.var_lvalue(heap, RETURN_VAR)?;
                self.assign(heap, fresh, &ptr, v)?;
                Ok(())
            }
            // control-flow effects are ignored; sub-expressions still run
            Stmt::Break(e) | Stmt::Continue(e) => {
                if let Some(e) = e {
                    let _ = self.expr(heap, e)?;
                }
                Ok(())
            }
            Stmt::Throw(e) => {
                let _ = self.expr(heap, e)?;
                Ok(())
            }
            Stmt::Try(body, catches) => {
                self.stmts(heap, body)?;
                for catch in catches {
                    let (fresh, ptr) = self.var_lvalue(heap, &catch.var)?;
                    self.assign(heap, fresh, &ptr, Value::Any)?;
                    self.stmts(heap, &catch.body)?;
                }
                Ok(())
            }
            Stmt::Global(names) => {
                for name in names {
                    let addr = self.env.global_cell(heap, name);
                    self.env.bind(name, addr);
                }
                Ok(())
            }
            Stmt::StaticVars(entries) => {
                for (name, init) in entries {
                    let key = format!("{}**{}", self.env.cfun, name);
                    let existed = self.env.globals.contains_key(&key);
                    let addr = self.env.global_cell(heap, &key);
                    self.env.bind(name, addr);
                    if let Some(init) = init {
                        let v = self.expr(heap, init)?;
                        self.assign(heap, !existed, &Value::Ptr(addr), v)?;
                    }
                }
                Ok(())
            }
            Stmt::FuncDef(def) => {
                if self.env.in_function() && self.opts.strict {
                    return Err(InterpError::Impossible(format!(
                        "nested function definition: {}",
                        def.name
                    )));
                }
                // top-level definitions live in the code database
                Ok(())
            }
            Stmt::ClassDef(def) => {
                if self.env.in_function() && self.opts.strict {
                    return Err(InterpError::Impossible(format!("nested class definition: {}", def.name)));
                }
                Ok(())
            }
            Stmt::ConstantDef(def) => {
                if self.env.in_function() {
                    return Err(InterpError::Impossible(format!(
                        "nested constant definition: {}",
                        def.name
                    )));
                }
                Ok(())
            }
            Stmt::Noop => Ok(()),
        }
    }

    /// The soundness pre-pass for one-sided definitions: a name introduced
    /// by some arms but not all of them gets a virtual `x = Null` binding
    /// before the arms run, so reading it afterwards yields at worst
    /// `Sum([Null, …])`. Names assigned in every arm are left alone — no
    /// path leaves them undefined.
    fn null_prepass(&mut self, heap: &mut Heap, arms: &[&[Stmt]]) {
        let mut per_arm: Vec<AHashSet<String>> = Vec::with_capacity(arms.len());
        for arm in arms {
            let mut set = AHashSet::new();
            collect_assigned(arm, &mut set);
            per_arm.push(set);
        }
        let mut union: AHashSet<String> = AHashSet::new();
        for set in &per_arm {
            union.extend(set.iter().cloned());
        }
        for name in &union {
            let everywhere = per_arm.iter().all(|set| set.contains(name));
            if !everywhere && self.env.lookup(name).is_none() {
                // var_get allocates the cell pair with a Null value cell
                let _ = self.env.var_get(heap, name);
            }
        }
    }

    /// Summarizes a collection into a (key, element) pair for `foreach`.
    fn collection_summary(&mut self, heap: &mut Heap, collection: &Value) -> (Value, Value) {
        match collection {
            Value::Array(elems) => {
                let resolved: Vec<Value> = elems.iter().map(|e| heap.resolve(e)).collect();
                let elem = fold_values(heap, resolved);
                (Value::Abstract(Ty::Int), elem)
            }
            Value::Record(fields) => {
                let keys: Vec<Value> = fields.keys().map(|k| Value::Str(k.clone())).collect();
                let vals: Vec<Value> = fields.values().map(|v| heap.resolve(v)).collect();
                (fold_values(heap, keys), fold_values(heap, vals))
            }
            Value::Map(summary) => (heap.resolve(&summary.key), heap.resolve(&summary.elem)),
            Value::Taint(label) => (Value::Taint(label.clone()), Value::Taint(label.clone())),
            Value::Any => (Value::Any, Value::Any),
            _ => (Value::Null, Value::Null),
        }
    }
}

fn fold_values(heap: &mut Heap, values: Vec<Value>) -> Value {
    let mut unifier = Unifier::new();
    let mut it = values.into_iter();
    match it.next() {
        None => Value::Null,
        Some(first) => it.fold(first, |acc, v| unifier.unify(heap, acc, v)),
    }
}

/// Collects the names of variables assigned anywhere in a statement list,
/// without descending into nested definitions or lambda bodies.
fn collect_assigned(stmts: &[Stmt], out: &mut AHashSet<String>) {
    for s in stmts {
        match s {
            Stmt::Expr(e) | Stmt::Throw(e) => collect_assigned_expr(e, out),
            Stmt::Block(body) | Stmt::While(_, body) | Stmt::Do(body, _) => collect_assigned(body, out),
            Stmt::If(cond, then, other) => {
                collect_assigned_expr(cond, out);
                collect_assigned(then, out);
                collect_assigned(other, out);
            }
            Stmt::For(init, cond, step, body) => {
                for e in init.iter().chain(cond).chain(step) {
                    collect_assigned_expr(e, out);
                }
                collect_assigned(body, out);
            }
            Stmt::Foreach { key, value, body, .. } => {
                if let Some(k) = key {
                    root_var(k, out);
                }
                root_var(value, out);
                collect_assigned(body, out);
            }
            Stmt::Switch(_, cases) => {
                for case in cases {
                    collect_assigned(&case.body, out);
                }
            }
            Stmt::Try(body, catches) => {
                collect_assigned(body, out);
                for catch in catches {
                    out.insert(catch.var.clone());
                    collect_assigned(&catch.body, out);
                }
            }
            Stmt::Return(Some(e)) | Stmt::Break(Some(e)) | Stmt::Continue(Some(e)) => {
                collect_assigned_expr(e, out);
            }
            _ => {}
        }
    }
}

fn collect_assigned_expr(e: &Expr, out: &mut AHashSet<String>) {
    match e {
        Expr::Assign(_, lhs, rhs) => {
            root_var(lhs, out);
            collect_assigned_expr(rhs, out);
        }
        Expr::Binop(_, l, r) | Expr::InstanceOf(l, r) => {
            collect_assigned_expr(l, out);
            collect_assigned_expr(r, out);
        }
        Expr::Cond(c, t, o) => {
            collect_assigned_expr(c, out);
            collect_assigned_expr(t, out);
            collect_assigned_expr(o, out);
        }
        Expr::Unop(_, inner) | Expr::Ref(inner) | Expr::Cast(_, inner) => collect_assigned_expr(inner, out),
        Expr::Call(callee, args) | Expr::New(callee, args) => {
            collect_assigned_expr(callee, out);
            for a in args {
                collect_assigned_expr(a, out);
            }
        }
        Expr::InterpString(parts) | Expr::List(parts) => {
            for p in parts {
                collect_assigned_expr(p, out);
            }
        }
        Expr::ConsArray(entries) => {
            for entry in entries {
                if let Some(k) = &entry.key {
                    collect_assigned_expr(k, out);
                }
                collect_assigned_expr(&entry.value, out);
            }
        }
        Expr::ObjGet(a, b) | Expr::ClassGet(a, b) => {
            collect_assigned_expr(a, out);
            collect_assigned_expr(b, out);
        }
        Expr::ArrayGet(base, key) => {
            collect_assigned_expr(base, out);
            if let Some(k) = key {
                collect_assigned_expr(k, out);
            }
        }
        Expr::IncrDecr { target, .. } => collect_assigned_expr(target, out),
        _ => {}
    }
}

/// The variable at the root of an assignment target, if any: `$x`,
/// `$x[0]`, `$x->f`, and destructuring lists all introduce `$x`.
fn root_var(e: &Expr, out: &mut AHashSet<String>) {
    match e {
        Expr::Var(name) => {
            out.insert(name.clone());
        }
        Expr::ArrayGet(base, _) | Expr::ObjGet(base, _) => root_var(base, out),
        Expr::List(items) => {
            for item in items {
                root_var(item, out);
            }
        }
        _ => {}
    }
}

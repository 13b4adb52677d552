//! The call engine: parameter binding, recursion and depth caps, and
//! direct/dynamic dispatch.
//!
//! Termination rests on two bounds: no function is entered more than twice
//! on a single chain, and a chain of *clean* calls (no tainted argument
//! anywhere) is cut at the configured depth. Tainted data forces deeper
//! exploration so sink checks see realistic flows.

use crate::{
    ast::{Expr, FunDef},
    env::{RETURN_VAR, THIS_VAR, is_variable},
    error::{InterpError, InterpResult},
    graph::CallNode,
    heap::Heap,
    run::{Interp, Snapshot},
    taint::{SINK_NAME, TaintHook, is_taint_free},
    tracer::{AnalysisTracer, PruneReason},
    unify::unify,
    value::{Closure, MethodVal, Value},
};

/// An argument prepared for binding: evaluated by value, or an alias of the
/// caller's variable cell for by-reference parameters.
enum Actual {
    Val(Value),
    Alias(Value),
}

impl Actual {
    fn value(&self) -> &Value {
        match self {
            Self::Val(v) | Self::Alias(v) => v,
        }
    }
}

impl<T: TaintHook, Tr: AnalysisTracer> Interp<'_, T, Tr> {
    /// Call expression dispatch: direct calls go straight to the database,
    /// anything else evaluates the callee and dispatches on its shape.
    pub(crate) fn call_expr(&mut self, heap: &mut Heap, callee: &Expr, args: &[Expr]) -> InterpResult<Value> {
        match callee {
            Expr::Id(name) if !is_variable(name) => self.call_named(heap, name, args),
            _ => {
                let v = self.expr(heap, callee)?;
                let v = heap.resolve(&v);
                self.dispatch_value(heap, &v, args)
            }
        }
    }

    /// Dispatch on an evaluated callee value.
    fn dispatch_value(&mut self, heap: &mut Heap, callee: &Value, args: &[Expr]) -> InterpResult<Value> {
        match callee {
            Value::Str(name) => {
                let name = name.clone();
                self.call_named(heap, &name, args)
            }
            Value::Method(mv) => self.call_methods(heap, mv, args),
            Value::Taint(label) => {
                for a in args {
                    let _ = self.expr(heap, a)?;
                }
                Ok(Value::Taint(label.clone()))
            }
            Value::Sum(alts) => {
                let alts = alts.clone();
                let mut acc: Option<Value> = None;
                for alt in alts {
                    if matches!(alt, Value::Str(_) | Value::Method(_) | Value::Taint(_)) {
                        let v = self.dispatch_value(heap, &alt, args)?;
                        acc = Some(match acc {
                            None => v,
                            Some(prev) => unify(heap, prev, v),
                        });
                    }
                }
                match acc {
                    Some(v) => Ok(v),
                    None => self.lost_control(heap, "sum without callable alternative", args),
                }
            }
            _ => self.lost_control(heap, callee.variant_name(), args),
        }
    }

    fn lost_control(&mut self, heap: &mut Heap, context: &str, args: &[Expr]) -> InterpResult<Value> {
        if self.opts.strict {
            return Err(InterpError::LostControl(context.to_owned()));
        }
        for a in args {
            let _ = self.expr(heap, a)?;
        }
        Ok(Value::Any)
    }

    /// A call to a named function. Handles the analyzer's hardcoded
    /// identities, then resolves through the database; an unresolved name
    /// still contributes a call-graph edge and falls back to the taint
    /// policy's unknown-call summary.
    pub(crate) fn call_named(&mut self, heap: &mut Heap, name: &str, args: &[Expr]) -> InterpResult<Value> {
        match name {
            "id" => {
                return match args.first() {
                    Some(a) => self.expr(heap, a),
                    None => Ok(Value::Null),
                };
            }
            "show" => {
                if let Some(a) = args.first() {
                    let v = self.expr(heap, a)?;
                    let rendered = heap.render(&heap.resolve(&v));
                    self.tracer.on_show(&rendered);
                }
                return Ok(Value::Null);
            }
            "checkpoint" => {
                self.checkpoint = Some(Snapshot {
                    heap: heap.clone(),
                    vars: self.env.vars_snapshot(),
                });
                return Ok(Value::Null);
            }
            _ => {}
        }
        let db = self.env.db;
        match db.fun(name) {
            Some(fdef) => {
                self.record_edge(CallNode::fun(name));
                self.call_fun(heap, fdef, name.to_owned(), CallNode::fun(name), None, args)
            }
            None if self.opts.strict => Err(InterpError::UnknownFunction(name.to_owned())),
            None => {
                self.record_edge(CallNode::fun(name));
                for a in args {
                    let _ = self.expr(heap, a)?;
                }
                Ok(self.taint.unknown_call(name))
            }
        }
    }

    /// Dynamic dispatch over a method bundle: every candidate closure is
    /// invoked and the return values are unified pairwise. Candidates stay
    /// distinct under unification thanks to their ids.
    pub(crate) fn call_methods(&mut self, heap: &mut Heap, mv: &MethodVal, args: &[Expr]) -> InterpResult<Value> {
        let receiver = mv.receiver.clone();
        let targets: Vec<Closure> = mv.targets.values().cloned().collect();
        let mut acc: Option<Value> = None;
        for closure in targets {
            let v = self.call_closure(heap, &receiver, &closure, args)?;
            acc = Some(match acc {
                None => v,
                Some(prev) => unify(heap, prev, v),
            });
        }
        acc.ok_or_else(|| InterpError::Impossible("method bundle with no targets".to_owned()))
    }

    /// Invokes one closure: a named function re-enters name resolution, a
    /// method runs inside its class scope, and the synthetic constructor
    /// goes through the class builder.
    pub(crate) fn call_closure(
        &mut self,
        heap: &mut Heap,
        receiver: &Value,
        closure: &Closure,
        args: &[Expr],
    ) -> InterpResult<Value> {
        match closure {
            Closure::Fun(name) => self.call_named(heap, name, args),
            Closure::Build(class) => self.build_instance(heap, class, args),
            Closure::Method { class, name } => {
                let db = self.env.db;
                let Some(cdef) = db.class(class) else {
                    if self.opts.strict {
                        return Err(InterpError::UnknownClass(class.clone()));
                    }
                    return Ok(Value::Any);
                };
                let Some(mdef) = cdef.method(name) else {
                    if self.opts.strict {
                        return Err(InterpError::UnknownMethod {
                            name: name.clone(),
                            class: class.clone(),
                            candidates: cdef.methods.iter().map(|m| m.def.name.clone()).collect(),
                        });
                    }
                    return Ok(Value::Any);
                };
                let node = CallNode::method(class, name);
                self.record_edge(node.clone());
                let bound_receiver = if mdef.is_static || matches!(receiver, Value::Null) {
                    None
                } else {
                    Some(receiver.clone())
                };
                let key = format!("{class}::{name}");
                let scope = self.enter_class_scope(heap, cdef)?;
                let result = self.call_fun(heap, &mdef.def, key, node, bound_receiver, args);
                self.exit_class_scope(scope);
                result
            }
        }
    }

    /// Runs a function body with bounded evaluation.
    ///
    /// `key` identifies the callee for recursion accounting and the safe
    /// cache (`name` for functions, `Class::name` for methods); `node` is
    /// the call-graph identity pushed onto the path.
    pub(crate) fn call_fun(
        &mut self,
        heap: &mut Heap,
        fdef: &FunDef,
        key: String,
        node: CallNode,
        receiver: Option<Value>,
        args: &[Expr],
    ) -> InterpResult<Value> {
        // evaluate each argument exactly once, aliasing by-ref formals
        let mut actuals: Vec<Actual> = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let by_ref = fdef.params.get(i).is_some_and(|p| p.by_ref) || matches!(arg, Expr::Ref(_));
            if by_ref {
                let inner = if let Expr::Ref(e) = arg { e } else { arg };
                let (_, ptr) = self.lvalue(heap, inner)?;
                actuals.push(Actual::Alias(ptr));
            } else {
                let v = self.expr(heap, arg)?;
                actuals.push(Actual::Val(v));
            }
        }
        let clean = actuals.iter().all(|a| is_taint_free(heap, a.value()));

        let n = self.env.stack.get(&key).copied().unwrap_or(0);
        if n >= 2 || (self.env.path.len() >= self.opts.max_depth && clean) {
            let reason = if n >= 2 { PruneReason::Recursion } else { PruneReason::Depth };
            self.tracer.on_call_pruned(&key, reason);
            if clean && let Some(cached) = self.env.safe.get(&key) {
                return Ok(cached.clone());
            }
            let cell = heap.alloc(Value::Any);
            return Ok(Value::Ptr(cell));
        }

        let save = self.env.enter_function(key.clone());
        self.env.path.push(node);
        *self.env.stack.entry(key.clone()).or_insert(0) += 1;
        self.tracer.on_call_enter(&key, self.env.path.len());

        let result = self.exec_frame(heap, fdef, actuals, receiver);

        // the scoped-acquisition discipline: restore on every exit path,
        // including errors, before propagating
        let sink_path = self.env.path.clone();
        if let Some(count) = self.env.stack.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        self.env.path.pop();
        self.env.restore(save);
        let ret = result?;

        if fdef.name == SINK_NAME {
            let resolved = heap.resolve(&ret);
            if let Some(finding) =
                self.taint
                    .check_danger(SINK_NAME, &self.env.file, &sink_path, heap, &resolved)
            {
                self.tracer.on_finding(&finding);
            }
        }
        if is_taint_free(heap, &ret) {
            self.env.safe.insert(key, ret.clone());
        }
        Ok(ret)
    }

    /// Binds parameters and executes the body inside an already-entered
    /// frame; the caller owns save/restore.
    fn exec_frame(
        &mut self,
        heap: &mut Heap,
        fdef: &FunDef,
        actuals: Vec<Actual>,
        receiver: Option<Value>,
    ) -> InterpResult<Value> {
        let mut actuals = actuals.into_iter();
        for param in &fdef.params {
            match actuals.next() {
                Some(Actual::Alias(Value::Ptr(a1))) => {
                    // the callee's first-level cell is the caller's:
                    // by-reference aliasing
                    self.env.bind(&param.name, a1);
                }
                Some(Actual::Alias(Value::Ref(set))) if !set.is_empty() => {
                    self.env.bind(&param.name, set[0]);
                }
                Some(actual) => {
                    let value_cell = heap.alloc(actual.value().clone());
                    let var_cell = heap.alloc(Value::Ptr(value_cell));
                    self.env.bind(&param.name, var_cell);
                }
                None => {
                    // missing actuals use the declared default, evaluated in
                    // the callee's environment after the others are bound
                    let v = match &param.default {
                        Some(d) => self.expr(heap, d)?,
                        None => Value::Null,
                    };
                    let value_cell = heap.alloc(v);
                    let var_cell = heap.alloc(Value::Ptr(value_cell));
                    self.env.bind(&param.name, var_cell);
                }
            }
        }
        if let Some(receiver) = receiver {
            let var_cell = heap.alloc(receiver);
            self.env.bind(THIS_VAR, var_cell);
        }
        self.stmts(heap, &fdef.body)?;
        match self.env.lookup(RETURN_VAR) {
            Some(a1) => Ok(heap.get(a1).clone()),
            None => Ok(Value::Null),
        }
    }
}

//! Lazy class materialization and inheritance flattening.
//!
//! A class becomes an `Object` value whose members are the flattened result
//! of single inheritance: constants, static variables, every method as a
//! statically-bound bundle, and the synthetic `*BUILD*` constructor that
//! materializes instances. Method lookup is resolved here, at construction
//! time — there is no vtable walk at call time.

use indexmap::IndexMap;

use crate::{
    ast::{ClassDef, Expr},
    env::{BUILD_METHOD, CLASS_MEMBER, OBJ_VAR, PARENT_KW, SELF_KW, is_variable},
    error::{InterpError, InterpResult},
    expr::{container_cell, read_ptr},
    heap::Heap,
    run::Interp,
    taint::TaintHook,
    tracer::AnalysisTracer,
    value::{Addr, Closure, MethodVal, Value},
};

/// Saved `self`/`parent` bindings around a method invocation.
pub(crate) struct ClassScopeSave {
    prev_self: Option<Addr>,
    prev_parent: Option<Addr>,
}

impl<T: TaintHook, Tr: AnalysisTracer> Interp<'_, T, Tr> {
    /// Returns the class-object pointer for `name`, materializing the class
    /// on first reference. Subsequent references hit the global binding.
    pub(crate) fn lazy_class(&mut self, heap: &mut Heap, name: &str) -> InterpResult<Value> {
        if let Some(addr) = self.env.globals.get(name) {
            return Ok(Value::Ptr(*addr));
        }
        self.force_class(heap, name)
    }

    /// Builds the flattened class object and binds it globally.
    fn force_class(&mut self, heap: &mut Heap, name: &str) -> InterpResult<Value> {
        let db = self.env.db;
        let Some(cdef) = db.class(name) else {
            return Err(InterpError::UnknownClass(name.to_owned()));
        };

        // bind a placeholder first so inheritance cycles terminate instead
        // of recursing forever
        let object_cell = heap.alloc(Value::Object(IndexMap::new()));
        let var_cell = heap.alloc(Value::Ptr(object_cell));
        self.env.bind_global(name, var_cell);

        // seed with the parent's flattened members
        let mut members: IndexMap<String, Value> = match &cdef.parent {
            Some(parent) => match self.lazy_class(heap, parent) {
                Ok(pptr) => object_members(heap, &pptr).unwrap_or_default(),
                Err(InterpError::UnknownClass(_)) if !self.opts.strict => IndexMap::new(),
                Err(e) => return Err(e),
            },
            None => IndexMap::new(),
        };

        let name_cell = heap.alloc(Value::Str(name.to_owned()));
        members.insert(CLASS_MEMBER.to_owned(), Value::Ptr(name_cell));

        for (cname, cexpr) in &cdef.constants {
            let v = self.expr(heap, cexpr)?;
            let cell = heap.alloc(v);
            members.insert(cname.clone(), Value::Ptr(cell));
        }
        // statics keep their declared (sigil-carrying) name: `C::$count`
        for var in cdef.vars.iter().filter(|v| v.is_static) {
            let v = match &var.default {
                Some(d) => self.expr(heap, d)?,
                None => Value::Null,
            };
            let cell = heap.alloc(v);
            members.insert(var.name.clone(), Value::Ptr(cell));
        }
        for method in &cdef.methods {
            let id = self.env.fresh_method_id();
            let closure = Closure::Method {
                class: name.to_owned(),
                name: method.def.name.clone(),
            };
            members.insert(method.def.name.clone(), Value::method(Value::Null, id, closure));
        }
        let build_id = self.env.fresh_method_id();
        members.insert(
            BUILD_METHOD.to_owned(),
            Value::method(Value::Null, build_id, Closure::Build(name.to_owned())),
        );

        heap.set(object_cell, Value::Object(members));
        self.tracer.on_class_built(name);
        Ok(Value::Ptr(var_cell))
    }

    /// The synthetic per-class constructor: builds one instance and returns
    /// its pointer.
    pub(crate) fn build_instance(&mut self, heap: &mut Heap, class: &str, _args: &[Expr]) -> InterpResult<Value> {
        let db = self.env.db;
        let Some(cdef) = db.class(class) else {
            if self.opts.strict {
                return Err(InterpError::UnknownClass(class.to_owned()));
            }
            return Ok(Value::Any);
        };

        // inheritance cycles get the same bounded treatment as recursion
        let guard_key = format!("{class}::{BUILD_METHOD}");
        let n = self.env.stack.get(&guard_key).copied().unwrap_or(0);
        if n >= 2 {
            let cell = heap.alloc(Value::Any);
            return Ok(Value::Ptr(cell));
        }
        *self.env.stack.entry(guard_key.clone()).or_insert(0) += 1;
        let result = self.build_instance_inner(heap, class, cdef);
        if let Some(count) = self.env.stack.get_mut(&guard_key) {
            *count = count.saturating_sub(1);
        }
        result
    }

    fn build_instance_inner(&mut self, heap: &mut Heap, class: &str, cdef: &ClassDef) -> InterpResult<Value> {
        // (a) the parent instance comes first, (b) its members are the base
        // layer of this one
        let mut members: IndexMap<String, Value> = match &cdef.parent {
            Some(parent) => {
                let pinst = self.build_instance(heap, parent, &[])?;
                object_members(heap, &pinst).unwrap_or_default()
            }
            None => IndexMap::new(),
        };

        let class_ptr = match self.lazy_class(heap, class) {
            Ok(ptr) => ptr,
            Err(InterpError::UnknownClass(_)) if !self.opts.strict => Value::Null,
            Err(e) => return Err(e),
        };

        let instance_cell = heap.new_cell();

        // (c) non-static instance variables, accessed without the sigil
        for var in cdef.vars.iter().filter(|v| !v.is_static) {
            let v = match &var.default {
                Some(d) => self.expr(heap, d)?,
                None => Value::Null,
            };
            let cell = heap.alloc(v);
            members.insert(strip_sigil(&var.name).to_owned(), Value::Ptr(cell));
        }

        // (d) every method of the flattened class, re-bound so `$this` is
        // the new instance
        if let Some(cls_members) = object_members(heap, &class_ptr) {
            for (mname, member) in cls_members {
                if mname == BUILD_METHOD {
                    continue;
                }
                if let Value::Method(mv) = member {
                    members.insert(
                        mname,
                        Value::Method(Box::new(MethodVal {
                            receiver: Value::Ptr(instance_cell),
                            targets: mv.targets,
                        })),
                    );
                }
            }
        }

        let name_cell = heap.alloc(Value::Str(class.to_owned()));
        members.insert(CLASS_MEMBER.to_owned(), Value::Ptr(name_cell));

        heap.set(instance_cell, Value::Object(members));
        // (e) the instance pointer is the value of `*BUILD*`
        Ok(Value::Ptr(instance_cell))
    }

    /// Constructor expression: resolve the class, materialize it, run the
    /// equivalent of `*myobj* = C::*BUILD*(args); *myobj*->__construct(args)`
    /// through the scratch variable, then read the scratch back and drop it.
    pub(crate) fn new_expr(&mut self, heap: &mut Heap, class_expr: &Expr, args: &[Expr]) -> InterpResult<Value> {
        let Some(name) = self.class_name_of(heap, class_expr)? else {
            if self.opts.strict {
                return Err(InterpError::LostControl("dynamic class in new".to_owned()));
            }
            for a in args {
                let _ = self.expr(heap, a)?;
            }
            return Ok(Value::Any);
        };
        match self.lazy_class(heap, &name) {
            Ok(_) => {}
            Err(InterpError::UnknownClass(_)) if !self.opts.strict => {
                for a in args {
                    let _ = self.expr(heap, a)?;
                }
                return Ok(Value::Any);
            }
            Err(e) => return Err(e),
        }

        let saved = self.env.unbind(OBJ_VAR);
        let result = self.new_with_scratch(heap, &name, args);
        self.env.unbind(OBJ_VAR);
        if let Some(addr) = saved {
            self.env.bind(OBJ_VAR, addr);
        }
        result
    }

    fn new_with_scratch(&mut self, heap: &mut Heap, name: &str, args: &[Expr]) -> InterpResult<Value> {
        let instance = self.build_instance(heap, name, args)?;
        let (fresh, ptr) = self.var_lvalue(heap, OBJ_VAR)?;
        self.assign(heap, fresh, &ptr, instance)?;

        // run the constructor if the flattened instance has one
        let ctor = object_members(heap, &read_ptr(heap, &ptr))
            .and_then(|members| members.get("__construct").cloned());
        if let Some(Value::Method(mv)) = ctor {
            let _ = self.call_methods(heap, &mv, args)?;
        }

        let (_, ptr) = self.var_lvalue(heap, OBJ_VAR)?;
        Ok(read_ptr(heap, &ptr))
    }

    /// Narrows a constructor's class expression to a class name: a bare
    /// identifier, the `self`/`parent` keywords, or any expression that
    /// evaluates to a string.
    fn class_name_of(&mut self, heap: &mut Heap, class_expr: &Expr) -> InterpResult<Option<String>> {
        match class_expr {
            Expr::Id(name) if name == SELF_KW || name == PARENT_KW => Ok(self.scoped_class_name(heap, name)),
            Expr::Id(name) if !is_variable(name) => Ok(Some(name.clone())),
            other => {
                let v = self.expr(heap, other)?;
                match heap.resolve(&v) {
                    Value::Str(s) => Ok(Some(s)),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Reads the class name recorded in the object bound to `self`/`parent`.
    fn scoped_class_name(&mut self, heap: &Heap, keyword: &str) -> Option<String> {
        let addr = self.env.globals.get(keyword)?;
        let members = object_members(heap, &Value::Ptr(*addr))?;
        match heap.resolve(members.get(CLASS_MEMBER)?) {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Resolves the class-object pointer for a `ClassGet` base expression.
    pub(crate) fn class_object_ptr(&mut self, heap: &mut Heap, class_expr: &Expr) -> InterpResult<Value> {
        match class_expr {
            Expr::Id(name) if name == SELF_KW || name == PARENT_KW => match self.env.globals.get(name) {
                Some(addr) => Ok(Value::Ptr(*addr)),
                None if self.opts.strict => Err(InterpError::UnknownClass(name.clone())),
                None => Ok(Value::Ptr(heap.alloc(Value::Any))),
            },
            Expr::Id(name) if !is_variable(name) => match self.lazy_class(heap, name) {
                Ok(ptr) => Ok(ptr),
                Err(InterpError::UnknownClass(_)) if !self.opts.strict => Ok(Value::Ptr(heap.alloc(Value::Any))),
                Err(e) => Err(e),
            },
            other => {
                let v = self.expr(heap, other)?;
                match heap.resolve(&v) {
                    Value::Str(s) => self.lazy_class(heap, &s),
                    Value::Taint(label) => Ok(Value::Ptr(heap.alloc(Value::Taint(label)))),
                    _ if self.opts.strict => Err(InterpError::LostControl("dynamic class reference".to_owned())),
                    _ => Ok(Value::Ptr(heap.alloc(Value::Any)))
                }
            }
        }
    }

    /// Binds `self` and `parent` for the duration of a method call. The
    /// returned save must go back through [`Self::exit_class_scope`] on
    /// every exit path.
    pub(crate) fn enter_class_scope(&mut self, heap: &mut Heap, cdef: &ClassDef) -> InterpResult<ClassScopeSave> {
        // materialize the class (and its parent) before touching the
        // scoped bindings, so an error here cannot leave them half-set
        match self.lazy_class(heap, &cdef.name) {
            Ok(_) => {}
            Err(InterpError::UnknownClass(_)) if !self.opts.strict => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = &cdef.parent {
            match self.lazy_class(heap, parent) {
                Ok(_) => {}
                Err(InterpError::UnknownClass(_)) if !self.opts.strict => {}
                Err(e) => return Err(e),
            }
        }

        let prev_self = self.env.globals.get(SELF_KW).copied();
        let prev_parent = self.env.globals.get(PARENT_KW).copied();
        if let Some(addr) = self.env.globals.get(&cdef.name).copied() {
            self.env.bind_global(SELF_KW, addr);
        }
        let parent_addr = cdef.parent.as_ref().and_then(|p| self.env.globals.get(p).copied());
        match parent_addr {
            Some(addr) => self.env.bind_global(PARENT_KW, addr),
            None => {
                self.env.globals.remove(PARENT_KW);
            }
        }
        Ok(ClassScopeSave { prev_self, prev_parent })
    }

    pub(crate) fn exit_class_scope(&mut self, save: ClassScopeSave) {
        match save.prev_self {
            Some(addr) => self.env.bind_global(SELF_KW, addr),
            None => {
                self.env.globals.remove(SELF_KW);
            }
        }
        match save.prev_parent {
            Some(addr) => self.env.bind_global(PARENT_KW, addr),
            None => {
                self.env.globals.remove(PARENT_KW);
            }
        }
    }
}

/// The member map of the object behind a pointer, if there is one.
pub(crate) fn object_members(heap: &Heap, ptr: &Value) -> Option<IndexMap<String, Value>> {
    let ca = container_cell(heap, ptr)?;
    match heap.get(ca) {
        Value::Object(members) => Some(members.clone()),
        _ => None,
    }
}

fn strip_sigil(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

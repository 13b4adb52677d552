//! Public interface for running a whole-program analysis.

use ahash::AHashMap;

use crate::{
    ast::{Expr, Stmt},
    class::object_members,
    db::Db,
    env::Env,
    error::InterpResult,
    graph::{CallGraph, CallNode},
    heap::Heap,
    taint::{RequestTaint, TaintFinding, TaintHook},
    tracer::{AnalysisTracer, NoopTracer},
    value::{Addr, Value},
};

/// Default call-stack depth cap for clean calls.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Analysis configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// When true, unknown constructs and identifiers are fatal; when false
    /// they are silently over-approximated to `Any`.
    pub strict: bool,
    /// When true, a synthetic root-level sweep calls every top-level
    /// definition after the file's statements run.
    pub extract_paths: bool,
    /// Call-chain depth cap for clean calls.
    pub max_depth: usize,
    /// Enables the taint policy passed to [`Analyzer::run`].
    pub taint_mode: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            strict: false,
            extract_paths: false,
            max_depth: DEFAULT_MAX_DEPTH,
            taint_mode: true,
        }
    }
}

/// The debug snapshot captured by a `checkpoint()` call: the heap and the
/// active variable bindings at that point.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub heap: Heap,
    pub vars: AHashMap<String, Addr>,
}

impl Snapshot {
    /// Resolves a captured variable through its indirection chain.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<Value> {
        let addr = self.vars.get(name)?;
        Some(self.heap.resolve(&Value::Ptr(*addr)))
    }

    /// Serializes the snapshot to a binary format for external drivers.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a snapshot produced by [`Snapshot::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// The outcome of one analysis run: the final heap, the accumulated call
/// graph and taint findings, and the last checkpoint if one was taken.
#[derive(Debug)]
pub struct Analysis {
    pub heap: Heap,
    pub call_graph: CallGraph,
    pub findings: Vec<TaintFinding>,
    pub checkpoint: Option<Snapshot>,
    globals: AHashMap<String, Addr>,
}

impl Analysis {
    /// Resolves a top-level variable through the two pointer hops of the
    /// variable model, yielding its final abstract value.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<Value> {
        let addr = self.globals.get(name)?;
        Some(self.heap.resolve(&Value::Ptr(*addr)))
    }

    /// Diagnostic rendering of a top-level variable.
    #[must_use]
    pub fn render_var(&self, name: &str) -> Option<String> {
        let addr = self.globals.get(name)?;
        Some(self.heap.render(self.heap.get(*addr)))
    }

    /// Whether a top-level binding exists.
    #[must_use]
    pub fn has_var(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// The first-level cell address of a top-level binding, for tests that
    /// inspect the indirection structure itself.
    #[must_use]
    pub fn var_cell(&self, name: &str) -> Option<Addr> {
        self.globals.get(name).copied()
    }
}

/// The top-level driver: owns the configuration and runs programs against
/// a code database.
#[derive(Debug, Clone)]
pub struct Analyzer<'d> {
    db: &'d Db,
    opts: Opts,
}

impl<'d> Analyzer<'d> {
    #[must_use]
    pub fn new(db: &'d Db) -> Self {
        Self {
            db,
            opts: Opts::default(),
        }
    }

    #[must_use]
    pub fn with_opts(db: &'d Db, opts: Opts) -> Self {
        Self { db, opts }
    }

    /// Runs the analysis with the default taint policy (honoring
    /// `Opts::taint_mode`) and no tracing.
    pub fn run(&self, file: &str, program: &[Stmt]) -> InterpResult<Analysis> {
        let mut taint = RequestTaint::new(self.opts.taint_mode);
        let mut tracer = NoopTracer;
        self.run_with(file, program, &mut taint, &mut tracer)
    }

    /// Runs the analysis with a caller-owned taint policy and tracer.
    pub fn run_with<T: TaintHook, Tr: AnalysisTracer>(
        &self,
        file: &str,
        program: &[Stmt],
        taint: &mut T,
        tracer: &mut Tr,
    ) -> InterpResult<Analysis> {
        let mut heap = Heap::new();
        let mut interp = Interp {
            env: Env::new(self.db, file),
            opts: &self.opts,
            taint,
            tracer,
            graph: CallGraph::new(),
            checkpoint: None,
        };
        interp.run_file(&mut heap, program)?;
        if self.opts.extract_paths {
            interp.fake_root_sweep(&mut heap)?;
        }
        Ok(Analysis {
            heap,
            call_graph: interp.graph,
            findings: interp.taint.take_findings(),
            checkpoint: interp.checkpoint,
            globals: interp.env.globals,
        })
    }
}

/// One interpretation in flight: the environment plus the process-wide
/// state the driver owns (mode flags, the running call graph, the
/// checkpoint slot).
pub(crate) struct Interp<'a, T: TaintHook, Tr: AnalysisTracer> {
    pub(crate) env: Env<'a>,
    pub(crate) opts: &'a Opts,
    pub(crate) taint: &'a mut T,
    pub(crate) tracer: &'a mut Tr,
    pub(crate) graph: CallGraph,
    pub(crate) checkpoint: Option<Snapshot>,
}

impl<T: TaintHook, Tr: AnalysisTracer> Interp<'_, T, Tr> {
    /// Records a call-graph edge from the current chain head.
    pub(crate) fn record_edge(&mut self, callee: CallNode) {
        let caller = self.env.path.last().cloned().unwrap_or(CallNode::Root);
        self.tracer.on_edge(&caller, &callee);
        self.graph.add(caller, callee);
    }

    /// Executes a file's top-level statements under its `File` node.
    fn run_file(&mut self, heap: &mut Heap, program: &[Stmt]) -> InterpResult<()> {
        self.env.path.push(CallNode::File(self.env.file.clone()));
        let result = self.stmts(heap, program);
        self.env.path.pop();
        result
    }

    /// The fake-root sweep: calls every function in the database with no
    /// arguments, then builds every class and calls each of its methods, so
    /// definitions unreachable from top-level code still contribute edges.
    fn fake_root_sweep(&mut self, heap: &mut Heap) -> InterpResult<()> {
        let db = self.env.db;
        for fdef in db.funs() {
            let _ = self.call_named(heap, &fdef.name, &[])?;
        }
        for cdef in db.classes() {
            let class_expr = Expr::Id(cdef.name.clone());
            let instance = self.new_expr(heap, &class_expr, &[])?;
            for method in &cdef.methods {
                let bundle = object_members(heap, &instance).and_then(|m| m.get(&method.def.name).cloned());
                if let Some(Value::Method(mv)) = bundle {
                    let _ = self.call_methods(heap, &mv, &[])?;
                }
            }
        }
        Ok(())
    }
}

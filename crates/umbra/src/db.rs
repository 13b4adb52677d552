//! The code database: name-indexed definitions the interpreter resolves
//! against.
//!
//! Loaded before interpretation starts by an external driver (in tests,
//! built from programs directly). Lookups return `Option`; the evaluator
//! turns misses into the `Unknown*` error family.

use indexmap::IndexMap;

use crate::ast::{ClassDef, ConstantDef, Expr, FunDef, Program, Stmt};

/// By-name lookups for function, class, and constant definitions.
///
/// Backed by insertion-ordered maps so whole-database sweeps (the fake-root
/// pass) visit definitions deterministically.
#[derive(Debug, Clone, Default)]
pub struct Db {
    funs: IndexMap<String, FunDef>,
    classes: IndexMap<String, ClassDef>,
    constants: IndexMap<String, Expr>,
}

impl Db {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the top-level definitions of one or more programs.
    #[must_use]
    pub fn from_programs<'p>(programs: impl IntoIterator<Item = &'p Program>) -> Self {
        let mut db = Self::new();
        for program in programs {
            db.add_program(program);
        }
        db
    }

    /// Adds every top-level definition of `program`. Later definitions of
    /// the same name win, matching load order in the source language.
    pub fn add_program(&mut self, program: &[Stmt]) {
        for stmt in program {
            match stmt {
                Stmt::FuncDef(f) => self.add_fun(f.clone()),
                Stmt::ClassDef(c) => self.add_class(c.clone()),
                Stmt::ConstantDef(ConstantDef { name, value }) => {
                    self.add_constant(name.clone(), value.clone());
                }
                _ => {}
            }
        }
    }

    pub fn add_fun(&mut self, def: FunDef) {
        self.funs.insert(def.name.clone(), def);
    }

    pub fn add_class(&mut self, def: ClassDef) {
        self.classes.insert(def.name.clone(), def);
    }

    pub fn add_constant(&mut self, name: String, value: Expr) {
        self.constants.insert(name, value);
    }

    #[must_use]
    pub fn fun(&self, name: &str) -> Option<&FunDef> {
        self.funs.get(name)
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    #[must_use]
    pub fn constant(&self, name: &str) -> Option<&Expr> {
        self.constants.get(name)
    }

    /// All function definitions in insertion order.
    pub fn funs(&self) -> impl Iterator<Item = &FunDef> {
        self.funs.values()
    }

    /// All class definitions in insertion order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }
}

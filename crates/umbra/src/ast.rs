//! The simplified program representation consumed by the interpreter.
//!
//! A parser and simplifier are external collaborators: they produce this
//! tree, and the crate's integration tests construct it directly. The shape
//! deliberately stays close to the surface language (variables carry their
//! `$` sigil, classes have single inheritance, arrays mix positional and
//! keyed entries) so the evaluator's case analysis reads like the language
//! semantics.

use crate::value::Ty;

/// A whole file: the statements in textual order, including top-level
/// definitions.
pub type Program = Vec<Stmt>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// String concatenation; taint flows through it.
    Concat,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    BitAnd,
    BitOr,
    Shl,
    Shr,
}

impl BinOp {
    /// Operators that always yield a boolean regardless of operands.
    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::And | Self::Or | Self::Xor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// One entry of an array construction expression. `key` is `None` for
/// positional entries (`array(1, 2)`), `Some` for keyed ones
/// (`array("k" => 1)`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArrayEntry {
    pub key: Option<Expr>,
    pub value: Expr,
}

/// An inline markup node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Xml {
    pub tag: String,
    pub attrs: Vec<(String, Expr)>,
    pub children: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// An interpolated string: the concatenation of the evaluated segments.
    InterpString(Vec<Expr>),
    /// A bare identifier: a constant, function, or class name.
    Id(String),
    /// A `$`-sigil variable (or one of the analyzer's reserved names).
    Var(String),
    Unop(UnOp, Box<Expr>),
    Binop(BinOp, Box<Expr>, Box<Expr>),
    /// Ternary conditional; both arms contribute to the result.
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Assignment, with an optional compound operator (`$x .= e`).
    Assign(Option<BinOp>, Box<Expr>, Box<Expr>),
    /// Destructuring target list, as the left side of an assignment.
    List(Vec<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),
    /// Instance member access: `$o->name`.
    ObjGet(Box<Expr>, Box<Expr>),
    /// Class member access: `C::name`, `C::$static`, `self::m`.
    ClassGet(Box<Expr>, Box<Expr>),
    /// Index access; `None` is the append form `$a[]`.
    ArrayGet(Box<Expr>, Option<Box<Expr>>),
    ConsArray(Vec<ArrayEntry>),
    /// A reference-producing expression: `&$x`.
    Ref(Box<Expr>),
    Cast(Ty, Box<Expr>),
    InstanceOf(Box<Expr>, Box<Expr>),
    /// `++$x` / `$x--`; the analysis ignores the numeric effect.
    IncrDecr {
        inc: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    /// Anonymous function; currently summarized as `Any`.
    Lambda(Box<FunDef>),
    Xhp(Xml),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Param {
    /// Parameter name including the sigil.
    pub name: String,
    pub default: Option<Expr>,
    pub by_ref: bool,
}

impl Param {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            default: None,
            by_ref: false,
        }
    }

    #[must_use]
    pub fn with_default(name: &str, default: Expr) -> Self {
        Self {
            name: name.to_owned(),
            default: Some(default),
            by_ref: false,
        }
    }

    #[must_use]
    pub fn by_ref(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            default: None,
            by_ref: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MethodDef {
    pub is_static: bool,
    pub def: FunDef,
}

/// A class-level variable declaration. Static variables become members of
/// the class object; instance variables are added at instance build time.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassVar {
    /// Declared name including the sigil.
    pub name: String,
    pub is_static: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub parent: Option<String>,
    pub constants: Vec<(String, Expr)>,
    pub vars: Vec<ClassVar>,
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Looks up a method definition by name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.def.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConstantDef {
    pub name: String,
    pub value: Expr,
}

/// One arm of a `switch`; `guard` is `None` for the default case.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SwitchCase {
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Catch {
    /// The caught class name (unused by the analysis beyond evaluation order).
    pub class: String,
    /// The bound exception variable, with sigil.
    pub var: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Expr(Expr),
    Block(Vec<Stmt>),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    Do(Vec<Stmt>, Expr),
    For(Vec<Expr>, Vec<Expr>, Vec<Expr>, Vec<Stmt>),
    Foreach {
        collection: Expr,
        key: Option<Expr>,
        value: Expr,
        body: Vec<Stmt>,
    },
    Switch(Expr, Vec<SwitchCase>),
    Return(Option<Expr>),
    Break(Option<Expr>),
    Continue(Option<Expr>),
    Throw(Expr),
    Try(Vec<Stmt>, Vec<Catch>),
    /// `global $x, $y;`
    Global(Vec<String>),
    /// `static $x = e;` — one entry per declared variable.
    StaticVars(Vec<(String, Option<Expr>)>),
    FuncDef(FunDef),
    ClassDef(ClassDef),
    ConstantDef(ConstantDef),
    /// Statements the simplifier chose not to model.
    Noop,
}

use std::fmt;

/// Result type alias for interpreter operations.
pub type InterpResult<T> = Result<T, InterpError>;

/// The interpreter's error taxonomy.
///
/// In strict mode every one of these escapes the top-level driver. In
/// non-strict mode each error site catches its specific kind, substitutes a
/// conservative fallback, and continues; only `Impossible` (an invariant
/// violation, i.e. a bug or malformed input) is fatal in both modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    /// Call target not found in the function database.
    UnknownFunction(String),
    /// Constant reference not found in the constant database.
    UnknownConstant(String),
    /// Class reference not found in the class database.
    UnknownClass(String),
    /// Member not present in an object's member map.
    UnknownMethod {
        name: String,
        class: String,
        candidates: Vec<String>,
    },
    /// Member access on a value that is not an object.
    UnknownObject(String),
    /// A dynamic call target could not be narrowed to any string or method.
    LostControl(String),
    /// Invariant violation (e.g. a nested constant definition).
    Impossible(String),
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            Self::UnknownConstant(name) => write!(f, "unknown constant: {name}"),
            Self::UnknownClass(name) => write!(f, "unknown class: {name}"),
            Self::UnknownMethod { name, class, candidates } => {
                write!(f, "unknown method {class}::{name} (have: {})", candidates.join(", "))
            }
            Self::UnknownObject(context) => write!(f, "member access on non-object in {context}"),
            Self::LostControl(context) => write!(f, "lost control of dynamic call target in {context}"),
            Self::Impossible(context) => write!(f, "interpreter invariant violated: {context}"),
        }
    }
}

impl std::error::Error for InterpError {}

use std::fmt;

use indexmap::IndexMap;
use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

/// Heap address of a value cell.
///
/// Addresses are allocated monotonically by [`Heap::alloc`](crate::heap::Heap::alloc)
/// and are never recycled; the analysis is finite so unreachable cells are
/// simply left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Addr(u32);

impl Addr {
    pub(crate) fn new(index: usize) -> Self {
        Self(index.try_into().expect("heap address overflow"))
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{}", self.0)
    }
}

/// Small sorted set of heap addresses carried by [`Value::Ref`].
///
/// Most multi-target references have exactly two targets (the result of
/// unifying two pointers), so the inline capacity avoids heap allocation
/// on the common path.
pub type AddrSet = SmallVec<[Addr; 2]>;

/// Scalar type tags for values whose type is known but whose content is not.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations; the string form matches the variant name exactly.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Ty {
    Int,
    Bool,
    Float,
    String,
    /// Markup nodes produced by inline document fragments.
    Xhp,
}

/// A callable target carried inside a [`Value::Method`].
///
/// The source language dispatches dynamically, so a method value does not
/// point at code directly; it names a definition that the call engine
/// resolves against the code database at invocation time. This keeps the
/// value domain plain data (cloneable, serializable) while still letting
/// unification merge dispatch targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Closure {
    /// A free function, by name.
    Fun(String),
    /// A method, by defining class and name. The defining class matters:
    /// inherited methods keep pointing at the class that declared them.
    Method { class: String, name: String },
    /// The synthetic per-class constructor that materializes instances.
    Build(String),
}

impl Closure {
    /// Key used for recursion accounting in the call engine.
    #[must_use]
    pub fn stack_key(&self) -> String {
        match self {
            Self::Fun(name) => name.clone(),
            Self::Method { class, name } => format!("{class}::{name}"),
            Self::Build(class) => format!("{class}::*BUILD*"),
        }
    }
}

/// The dispatchable bundle stored under a method name in an object.
///
/// `targets` is keyed by a unique id handed out at class-construction time;
/// the ids keep overrides distinct when unification merges two objects that
/// both define the same method name.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MethodVal {
    /// `Null` for statically-bound dispatch (class-level methods, `*BUILD*`),
    /// the instance pointer otherwise.
    pub receiver: Value,
    /// Candidate closures, keyed by a fresh id per materialization.
    pub targets: IndexMap<u32, Closure>,
}

/// Key and element summaries of an abstract unbounded map.
///
/// Both fields normally hold `Ptr` values into the heap so that indexing
/// produces an addressable location.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MapSummary {
    pub key: Value,
    pub elem: Value,
}

/// An element of the abstract value lattice.
///
/// A single variable cell holds exactly one `Value` at a time; non-deterministic
/// choice is expressed by [`Value::Sum`]. The ordering is the usual one:
/// literals below `Abstract` of the same type, everything below `Any`,
/// singletons below a `Sum` containing them.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// Top of the lattice; no information.
    Any,
    /// The distinguished null.
    Null,
    /// Known type, unknown content.
    Abstract(Ty),
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Indirection to a single heap cell.
    Ptr(Addr),
    /// Multi-target reference; the set always has at least one address.
    Ref(AddrSet),
    /// String-keyed map with statically known keys. Field values are
    /// normally `Ptr` cells so fields are addressable.
    Record(IndexMap<String, Value>),
    /// Positional container; elements are `Ptr` cells.
    Array(Vec<Value>),
    /// Abstract unbounded associative container: one key summary and one
    /// element summary.
    Map(Box<MapSummary>),
    /// Class or instance: members are `Ptr` cells for fields and constants,
    /// `Method` bundles for callables.
    Object(IndexMap<String, Value>),
    /// Dispatchable method bundle.
    Method(Box<MethodVal>),
    /// Flat union of at least two distinct alternatives.
    Sum(Vec<Value>),
    /// Taint sentinel; the label records the origin of the untrusted data.
    Taint(String),
}

impl Value {
    /// Builds a `Method` value from a receiver and a single target.
    #[must_use]
    pub fn method(receiver: Self, id: u32, target: Closure) -> Self {
        let mut targets = IndexMap::new();
        targets.insert(id, target);
        Self::Method(Box::new(MethodVal { receiver, targets }))
    }

    /// Builds a `Map` from key and element summaries.
    #[must_use]
    pub fn map(key: Self, elem: Self) -> Self {
        Self::Map(Box::new(MapSummary { key, elem }))
    }

    /// Whether the value is shaped like an integer (a literal or the
    /// abstract int). Used by the arithmetic widening rules.
    #[must_use]
    pub fn is_int_shaped(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Abstract(Ty::Int))
    }

    /// The scalar type of a literal, if the value is one.
    #[must_use]
    pub fn literal_ty(&self) -> Option<Ty> {
        match self {
            Self::Bool(_) => Some(Ty::Bool),
            Self::Int(_) => Some(Ty::Int),
            Self::Float(_) => Some(Ty::Float),
            Self::Str(_) => Some(Ty::String),
            _ => None,
        }
    }

    /// Static name of the variant, used by heap statistics.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::Null => "Null",
            Self::Abstract(_) => "Abstract",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Str(_) => "Str",
            Self::Ptr(_) => "Ptr",
            Self::Ref(_) => "Ref",
            Self::Record(_) => "Record",
            Self::Array(_) => "Array",
            Self::Map(_) => "Map",
            Self::Object(_) => "Object",
            Self::Method(_) => "Method",
            Self::Sum(_) => "Sum",
            Self::Taint(_) => "Taint",
        }
    }

    /// All heap addresses mentioned directly by this value (one level deep,
    /// not chasing pointers). Containers contribute their cell pointers.
    pub fn direct_addrs(&self, out: &mut Vec<Addr>) {
        match self {
            Self::Ptr(a) => out.push(*a),
            Self::Ref(set) => out.extend(set.iter().copied()),
            Self::Record(fields) | Self::Object(fields) => {
                for v in fields.values() {
                    v.direct_addrs(out);
                }
            }
            Self::Array(elems) => {
                for v in elems {
                    v.direct_addrs(out);
                }
            }
            Self::Map(m) => {
                m.key.direct_addrs(out);
                m.elem.direct_addrs(out);
            }
            Self::Method(m) => m.receiver.direct_addrs(out),
            Self::Sum(alts) => {
                for v in alts {
                    v.direct_addrs(out);
                }
            }
            _ => {}
        }
    }
}

/// Builds a normalized address set: sorted, deduplicated.
#[must_use]
pub fn addr_set(addrs: impl IntoIterator<Item = Addr>) -> AddrSet {
    let mut set: AddrSet = addrs.into_iter().collect();
    set.sort_unstable();
    set.dedup();
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_set_sorts_and_dedups() {
        let set = addr_set([Addr::new(3), Addr::new(1), Addr::new(3)]);
        assert_eq!(set.as_slice(), &[Addr::new(1), Addr::new(3)]);
    }

    #[test]
    fn closure_stack_keys() {
        assert_eq!(Closure::Fun("f".into()).stack_key(), "f");
        assert_eq!(
            Closure::Method {
                class: "A".into(),
                name: "m".into()
            }
            .stack_key(),
            "A::m"
        );
        assert_eq!(Closure::Build("A".into()).stack_key(), "A::*BUILD*");
    }
}

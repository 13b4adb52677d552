//! The call graph accumulated during interpretation.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

/// A node of the call graph.
///
/// `Root` is the synthetic caller above all top-level definitions (the
/// "fake root"); `File` is the top level of one analyzed file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum CallNode {
    Root,
    File(String),
    Fun(String),
    Method { class: String, name: String },
}

impl CallNode {
    #[must_use]
    pub fn fun(name: &str) -> Self {
        Self::Fun(name.to_owned())
    }

    #[must_use]
    pub fn method(class: &str, name: &str) -> Self {
        Self::Method {
            class: class.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl fmt::Display for CallNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "FakeRoot"),
            Self::File(path) => write!(f, "File:{path}"),
            Self::Fun(name) => write!(f, "Function:{name}"),
            Self::Method { class, name } => write!(f, "Method:{class}::{name}"),
        }
    }
}

/// Caller → callees adjacency, in first-seen order.
///
/// Edges are recorded whenever a direct or dynamic call resolves a target
/// *or fails to resolve one* — an unresolved name still becomes a node, so
/// downstream consumers see the attempt.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: IndexMap<CallNode, IndexSet<CallNode>>,
}

impl CallGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, caller: CallNode, callee: CallNode) {
        self.edges.entry(caller).or_default().insert(callee);
    }

    #[must_use]
    pub fn has_edge(&self, caller: &CallNode, callee: &CallNode) -> bool {
        self.edges.get(caller).is_some_and(|set| set.contains(callee))
    }

    /// The callees recorded for `caller`, in first-seen order.
    pub fn callees(&self, caller: &CallNode) -> impl Iterator<Item = &CallNode> {
        self.edges.get(caller).into_iter().flatten()
    }

    /// Every callee of any caller, useful for "was this ever called" checks.
    pub fn all_callees(&self) -> impl Iterator<Item = &CallNode> {
        self.edges.values().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CallNode, &IndexSet<CallNode>)> {
        self.edges.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Serializes the adjacency as a JSON object keyed by the node string
    /// forms (`Function:<name>`, `Method:<class>::<name>`).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (caller, callees) in &self.edges {
            let list: Vec<serde_json::Value> =
                callees.iter().map(|c| serde_json::Value::String(c.to_string())).collect();
            map.insert(caller.to_string(), serde_json::Value::Array(list));
        }
        serde_json::Value::Object(map)
    }
}

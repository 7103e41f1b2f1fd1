//! Dependency graph of named resources (optimized)
//!
//! Vertex ids are hierarchical dot paths ("root.m1.web"). The id doubles as a
//! locator: [`parent_id`] and [`sibling_id`] are pure string functions, so the
//! structural hierarchy needs no extra bookkeeping in the graph itself.
//! Dependency edges are explicit and distinct from the structural hierarchy.
//!
//! Performance notes:
//! - Arc<str> for zero-cost cloning of vertex ids
//! - FxHashMap for faster hashing (non-crypto)
//! - SmallVec for stack-allocated small edge lists (0-4 items)

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

use crate::resource::Preparer;

/// Stack-allocated edges: most vertices have 0-4 dependencies
pub type EdgeVec = SmallVec<[Arc<str>; 4]>;

/// The reserved first segment of every well-formed vertex id.
pub const ROOT_ID: &str = "root";

/// Errors raised by graph mutators and ordering.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate vertex id \"{0}\"")]
    DuplicateNode(String),

    #[error("edge {from} -> {to} references a missing vertex \"{missing}\"")]
    MissingEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("dependency cycle involving: {0:?}")]
    CycleDetected(Vec<String>),
}

/// Per-vertex metadata: the id plus the parse-time resource value.
///
/// The value is polymorphic over the registered resource kinds; the kind tag
/// is whatever the record reports as its type name.
#[derive(Clone)]
pub struct NodeMeta {
    id: Arc<str>,
    preparer: Arc<dyn Preparer>,
}

impl NodeMeta {
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// Kind tag ("module", "file.content", ...).
    pub fn kind(&self) -> &'static str {
        self.preparer.type_name()
    }

    pub fn preparer(&self) -> &Arc<dyn Preparer> {
        &self.preparer
    }

    pub fn is_module(&self) -> bool {
        self.kind() == crate::resource::module::KIND
    }
}

impl std::fmt::Debug for NodeMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMeta")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Directed graph of named vertices.
///
/// Lookups on missing ids return "absent" rather than failing; only the
/// mutators report errors. The structure is frozen once the render pass
/// starts, so reads need no locking.
#[derive(Default)]
pub struct Graph {
    nodes: FxHashMap<Arc<str>, NodeMeta>,
    /// vertex -> outgoing dependency edges (the vertices it depends on)
    edges: FxHashMap<Arc<str>, EdgeVec>,
    /// vertex -> incoming edges (the vertices that depend on it)
    dependents: FxHashMap<Arc<str>, EdgeVec>,
    /// insertion order, for deterministic iteration
    order: Vec<Arc<str>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) existence check.
    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All vertex ids in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &Arc<str>> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Dependency edges out of `id` (not the structural children).
    #[inline]
    pub fn children(&self, id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.edges.get(id).map(|v| v.as_slice()).unwrap_or(EMPTY)
    }

    /// Vertices that depend on `id`.
    #[inline]
    pub fn dependents(&self, id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.dependents
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    pub fn get(&self, id: &str) -> Option<&NodeMeta> {
        self.nodes.get(id)
    }

    /// Interned id for a vertex already in the graph.
    pub fn resolve_id(&self, id: &str) -> Option<Arc<str>> {
        self.nodes.get(id).map(|m| Arc::clone(&m.id))
    }

    /// Add a vertex. Fails on duplicate ids.
    pub fn add(&mut self, id: &str, preparer: Arc<dyn Preparer>) -> Result<(), GraphError> {
        if self.nodes.contains_key(id) {
            return Err(GraphError::DuplicateNode(id.to_string()));
        }
        let id: Arc<str> = Arc::from(id);
        self.order.push(Arc::clone(&id));
        self.edges.insert(Arc::clone(&id), EdgeVec::new());
        self.dependents.insert(Arc::clone(&id), EdgeVec::new());
        self.nodes.insert(
            Arc::clone(&id),
            NodeMeta {
                id,
                preparer,
            },
        );
        Ok(())
    }

    /// Add a dependency edge `from -> to` (`from` depends on `to`).
    ///
    /// Both endpoints must already exist. Duplicate edges are dropped.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let missing_endpoint = |missing: &str| GraphError::MissingEndpoint {
            from: from.to_string(),
            to: to.to_string(),
            missing: missing.to_string(),
        };
        let from_arc = self.resolve_id(from).ok_or_else(|| missing_endpoint(from))?;
        let to_arc = self.resolve_id(to).ok_or_else(|| missing_endpoint(to))?;

        let out = self.edges.entry(Arc::clone(&from_arc)).or_default();
        if out.iter().any(|e| e.as_ref() == to) {
            return Ok(());
        }
        out.push(Arc::clone(&to_arc));
        self.dependents.entry(to_arc).or_default().push(from_arc);
        Ok(())
    }

    /// Dependency-first topological order (Kahn), lexicographic tie-break so
    /// runs are reproducible. Rejects cycles, naming the vertices left over.
    pub fn topo_order(&self) -> Result<Vec<Arc<str>>, GraphError> {
        let mut remaining: FxHashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_ref(), self.children(id).len()))
            .collect();

        let mut ready: Vec<&Arc<str>> = self
            .order
            .iter()
            .filter(|id| remaining[id.as_ref()] == 0)
            .collect();
        ready.sort_unstable_by(|a, b| b.cmp(a));

        let mut result = Vec::with_capacity(self.order.len());
        while let Some(id) = ready.pop() {
            result.push(Arc::clone(id));

            let mut unlocked: Vec<&Arc<str>> = Vec::new();
            for dep in self.dependents(id) {
                let count = remaining
                    .get_mut(dep.as_ref())
                    .expect("dependent edge to unknown vertex");
                *count -= 1;
                if *count == 0 {
                    unlocked.push(
                        self.nodes
                            .get_key_value(dep.as_ref())
                            .expect("dependent vertex present")
                            .0,
                    );
                }
            }
            unlocked.sort_unstable_by(|a, b| b.cmp(a));
            ready.extend(unlocked);
            ready.sort_unstable_by(|a, b| b.cmp(a));
        }

        if result.len() != self.order.len() {
            let mut stuck: Vec<String> = remaining
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            stuck.sort();
            return Err(GraphError::CycleDetected(stuck));
        }
        Ok(result)
    }

    /// Check there is a path `from -> to` along dependency edges (BFS).
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return self.contains(from);
        }
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: Vec<&str> = vec![from];
        visited.insert(from);
        while let Some(current) = queue.pop() {
            for next in self.children(current) {
                if next.as_ref() == to {
                    return true;
                }
                if visited.insert(next.as_ref()) {
                    queue.push(next.as_ref());
                }
            }
        }
        false
    }
}

// ============================================================================
// HIERARCHICAL ID HELPERS
// ============================================================================

/// Drop the last segment of `id`. The root id is its own parent.
pub fn parent_id(id: &str) -> &str {
    match id.rfind('.') {
        Some(idx) => &id[..idx],
        None => id,
    }
}

/// Replace the last segment of `base` with `leaf`.
pub fn sibling_id(base: &str, leaf: &str) -> String {
    match base.rfind('.') {
        Some(idx) => format!("{}.{}", &base[..idx], leaf),
        None => leaf.to_string(),
    }
}

/// True iff the id is exactly the root.
#[inline]
pub fn is_root(id: &str) -> bool {
    id == ROOT_ID
}

/// Check an id against the normative format: dot-separated, first segment
/// `root`, segments non-empty over `[A-Za-z0-9_-]`.
pub fn is_valid_id(id: &str) -> bool {
    let mut segments = id.split('.');
    if segments.next() != Some(ROOT_ID) {
        return false;
    }
    // the root segment alone is valid
    let mut rest = id.split('.').skip(1).peekable();
    if rest.peek().is_none() {
        return true;
    }
    rest.all(|seg| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::shell::ShellPreparer;

    fn shell() -> Arc<dyn Preparer> {
        Arc::new(ShellPreparer::with_check("true"))
    }

    fn graph_of(ids: &[&str]) -> Graph {
        let mut g = Graph::new();
        for id in ids {
            g.add(id, shell()).unwrap();
        }
        g
    }

    #[test]
    fn add_and_contains() {
        let g = graph_of(&["root.a", "root.b"]);
        assert!(g.contains("root.a"));
        assert!(!g.contains("root.c"));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn add_duplicate_fails() {
        let mut g = graph_of(&["root.a"]);
        let err = g.add("root.a", shell()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(id) if id == "root.a"));
    }

    #[test]
    fn connect_missing_endpoint_fails() {
        let mut g = graph_of(&["root.a"]);
        let err = g.connect("root.a", "root.b").unwrap_err();
        assert!(matches!(err, GraphError::MissingEndpoint { missing, .. } if missing == "root.b"));
    }

    #[test]
    fn connect_deduplicates() {
        let mut g = graph_of(&["root.a", "root.b"]);
        g.connect("root.a", "root.b").unwrap();
        g.connect("root.a", "root.b").unwrap();
        assert_eq!(g.children("root.a").len(), 1);
        assert_eq!(g.dependents("root.b").len(), 1);
    }

    #[test]
    fn missing_lookups_return_absent() {
        let g = graph_of(&["root.a"]);
        assert!(g.get("root.zzz").is_none());
        assert!(g.children("root.zzz").is_empty());
    }

    #[test]
    fn topo_order_dependencies_first() {
        let mut g = graph_of(&["root.a", "root.b", "root.c"]);
        // a depends on b, b depends on c
        g.connect("root.a", "root.b").unwrap();
        g.connect("root.b", "root.c").unwrap();
        let order = g.topo_order().unwrap();
        let order: Vec<&str> = order.iter().map(|s| s.as_ref()).collect();
        assert_eq!(order, vec!["root.c", "root.b", "root.a"]);
    }

    #[test]
    fn topo_order_is_deterministic() {
        let g = graph_of(&["root.c", "root.a", "root.b"]);
        let order: Vec<String> = g
            .topo_order()
            .unwrap()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(order, vec!["root.a", "root.b", "root.c"]);
    }

    #[test]
    fn topo_order_rejects_cycles() {
        let mut g = graph_of(&["root.a", "root.b"]);
        g.connect("root.a", "root.b").unwrap();
        g.connect("root.b", "root.a").unwrap();
        match g.topo_order() {
            Err(GraphError::CycleDetected(ids)) => {
                assert_eq!(ids, vec!["root.a".to_string(), "root.b".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn has_path_follows_edges() {
        let mut g = graph_of(&["root.a", "root.b", "root.c"]);
        g.connect("root.a", "root.b").unwrap();
        g.connect("root.b", "root.c").unwrap();
        assert!(g.has_path("root.a", "root.c"));
        assert!(!g.has_path("root.c", "root.a"));
    }

    #[test]
    fn parent_and_sibling_ids() {
        assert_eq!(parent_id("root.m1.web"), "root.m1");
        assert_eq!(parent_id("root"), "root");
        assert_eq!(sibling_id("root.m1.web", "db"), "root.m1.db");
        assert_eq!(sibling_id("root", "db"), "db");
    }

    #[test]
    fn root_checks() {
        assert!(is_root("root"));
        assert!(!is_root("root.a"));
    }

    #[test]
    fn id_format() {
        assert!(is_valid_id("root"));
        assert!(is_valid_id("root.m1.file-server_2"));
        assert!(!is_valid_id("m1.web"));
        assert!(!is_valid_id("root..web"));
        assert!(!is_valid_id("root.we b"));
    }
}

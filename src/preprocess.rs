//! Reference resolution over the vertex namespace
//!
//! Turns dotted references ("web.dest") into a vertex id plus a trail of
//! field accessors by longest-prefix matching against the graph. The
//! scope-aware variant walks the structural hierarchy outward, stopping at
//! module boundaries, which gives the configuration language lexical scope.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::graph::{self, Graph};

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    /// No prefix of the reference names an existing vertex.
    #[error("reference \"{path}\" does not match any vertex")]
    MissingVertex { path: String },
}

/// Split a dotted reference on '.'.
pub fn split_terms(input: &str) -> Vec<&str> {
    input.split('.').collect()
}

/// Join terms back into a dotted reference.
pub fn join_terms(terms: &[&str]) -> String {
    terms.join(".")
}

/// Heads of a term list, longest first: [1,2,3] -> [[1,2,3],[1,2],[1]].
pub fn inits<'a>(terms: &[&'a str]) -> Vec<Vec<&'a str>> {
    (1..=terms.len())
        .rev()
        .map(|len| terms[..len].to_vec())
        .collect()
}

/// Dotted prefixes of a reference, longest first:
/// "a.b.c.d" -> ["a.b.c.d", "a.b.c", "a.b", "a"].
pub fn prefixes(input: &str) -> Vec<String> {
    inits(&split_terms(input))
        .iter()
        .map(|terms| join_terms(terms))
        .collect()
}

/// Rewrite a term group into an accessor pipeline: "b.c.d" -> "b | c | d".
pub fn mk_call_pipeline(input: &str) -> String {
    split_terms(input).join(" | ")
}

/// A resolved reference: the matched vertex id and the leftover field path.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRef {
    pub vertex: Arc<str>,
    pub rest: String,
}

impl SplitRef {
    /// Leftover terms as accessors.
    pub fn terms(&self) -> Vec<&str> {
        if self.rest.is_empty() {
            Vec::new()
        } else {
            split_terms(&self.rest)
        }
    }
}

/// Longest-prefix match of `input` against the graph's vertex ids.
///
/// Returns the matched id and the remainder after the separating dot, or
/// `None` when no prefix is a vertex.
pub fn vertex_split(g: &Graph, input: &str) -> Option<SplitRef> {
    let prefix = prefixes(input).into_iter().find(|p| g.contains(p))?;
    let rest = if prefix.len() == input.len() {
        String::new()
    } else {
        input[prefix.len() + 1..].to_string()
    };
    let vertex = g.resolve_id(&prefix).expect("matched prefix is a vertex");
    Some(SplitRef { vertex, rest })
}

/// Stop predicate for the scope-aware traversal.
pub type StopFn<'a> = &'a dyn Fn(&Graph, &str) -> bool;

/// Stop at the root, at missing vertices, and at module vertices. Scoped
/// resolution therefore never crosses the nearest enclosing module.
pub fn traverse_until_module(g: &Graph, id: &str) -> bool {
    if graph::is_root(id) {
        return true;
    }
    match g.get(id) {
        Some(meta) => meta.is_module(),
        None => true,
    }
}

/// Scope-aware variant of [`vertex_split`].
///
/// From `start`, descend into dependency children first (skipping any the
/// stop predicate rejects), then try the reference as a sibling of `start`,
/// then retry from the structural parent unless stopped. The visited set
/// guards against revisiting shared descendants.
pub fn vertex_split_traverse(
    g: &Graph,
    to_find: &str,
    start: &str,
    stop: StopFn<'_>,
) -> Option<SplitRef> {
    let mut visited: FxHashSet<String> = FxHashSet::default();
    traverse_inner(g, to_find, start, stop, &mut visited)
}

fn traverse_inner(
    g: &Graph,
    to_find: &str,
    start: &str,
    stop: StopFn<'_>,
    visited: &mut FxHashSet<String>,
) -> Option<SplitRef> {
    visited.insert(start.to_string());

    for child in g.children(start) {
        if visited.contains(child.as_ref()) || stop(g, child) {
            continue;
        }
        if let Some(found) = traverse_inner(g, to_find, child, stop, visited) {
            return Some(found);
        }
    }

    let qualified = graph::sibling_id(start, to_find);
    if let Some(found) = vertex_split(g, &qualified) {
        return Some(found);
    }

    if stop(g, start) {
        return None;
    }
    let parent = graph::parent_id(start);
    if parent == start {
        return None;
    }
    traverse_inner(g, to_find, parent, stop, visited)
}

/// Desugar a dotted call into its two-stage form: a vertex reference plus a
/// pipeline of the remaining field accessors.
///
/// "task.go-dl.dir" with vertex "task.go-dl" present becomes
/// `(noderef "task.go-dl") | dir`.
pub fn desugar_call(g: &Graph, call: &str) -> Result<String, ResolveError> {
    let split = vertex_split(g, call).ok_or_else(|| ResolveError::MissingVertex {
        path: call.to_string(),
    })?;
    Ok(render_desugared(&split))
}

/// Scope-aware desugaring, used while rendering a vertex's templates.
pub fn desugar_call_scoped(
    g: &Graph,
    call: &str,
    from: &str,
) -> Result<SplitRef, ResolveError> {
    vertex_split_traverse(g, call, from, &traverse_until_module).ok_or_else(|| {
        ResolveError::MissingVertex {
            path: call.to_string(),
        }
    })
}

fn render_desugared(split: &SplitRef) -> String {
    if split.rest.is_empty() {
        format!("(noderef {:?})", split.vertex.as_ref())
    } else {
        format!(
            "(noderef {:?}) | {}",
            split.vertex.as_ref(),
            mk_call_pipeline(&split.rest)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::resource::module::ModulePreparer;
    use crate::resource::shell::ShellPreparer;
    use crate::resource::Preparer;
    use pretty_assertions::assert_eq;

    fn shell() -> Arc<dyn Preparer> {
        Arc::new(ShellPreparer::with_check("true"))
    }

    fn module() -> Arc<dyn Preparer> {
        Arc::new(ModulePreparer::default())
    }

    fn graph_of(ids: &[&str]) -> Graph {
        let mut g = Graph::new();
        for id in ids {
            let prep = if id.ends_with(".module") || *id == "root" {
                module()
            } else {
                shell()
            };
            g.add(id, prep).unwrap();
        }
        g
    }

    #[test]
    fn prefixes_longest_first() {
        assert_eq!(
            prefixes("a.b.c.d"),
            vec!["a.b.c.d", "a.b.c", "a.b", "a"]
        );
        assert_eq!(prefixes("a"), vec!["a"]);
    }

    #[test]
    fn inits_ordering() {
        assert_eq!(
            inits(&["1", "2", "3"]),
            vec![vec!["1", "2", "3"], vec!["1", "2"], vec!["1"]]
        );
    }

    #[test]
    fn mk_call_pipeline_joins_terms() {
        assert_eq!(mk_call_pipeline("b.c.d"), "b | c | d");
        assert_eq!(mk_call_pipeline("b"), "b");
    }

    #[test]
    fn vertex_split_picks_longest_prefix() {
        let g = graph_of(&["a", "a.b", "a.b.c"]);

        let split = vertex_split(&g, "a.b.c.d.e").unwrap();
        assert_eq!(split.vertex.as_ref(), "a.b.c");
        assert_eq!(split.rest, "d.e");

        let split = vertex_split(&g, "a.b.x").unwrap();
        assert_eq!(split.vertex.as_ref(), "a.b");
        assert_eq!(split.rest, "x");

        assert!(vertex_split(&g, "z").is_none());
    }

    #[test]
    fn vertex_split_exact_match_has_empty_rest() {
        let g = graph_of(&["a.b"]);
        let split = vertex_split(&g, "a.b").unwrap();
        assert_eq!(split.vertex.as_ref(), "a.b");
        assert_eq!(split.rest, "");
        assert!(split.terms().is_empty());
    }

    #[test]
    fn desugar_emits_noderef_pipeline() {
        let g = graph_of(&["task.go-dl"]);
        assert_eq!(
            desugar_call(&g, "task.go-dl.dir").unwrap(),
            "(noderef \"task.go-dl\") | dir"
        );
        assert_eq!(
            desugar_call(&g, "task.go-dl").unwrap(),
            "(noderef \"task.go-dl\")"
        );
    }

    #[test]
    fn desugar_missing_vertex_fails() {
        let g = graph_of(&["task.go-dl"]);
        let err = desugar_call(&g, "nope.nothing").unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingVertex {
                path: "nope.nothing".to_string()
            }
        );
    }

    #[test]
    fn traverse_finds_sibling_in_same_scope() {
        let g = graph_of(&["root.m1.module", "root.m1.web", "root.m1.app"]);
        let split =
            vertex_split_traverse(&g, "web.dest", "root.m1.app", &traverse_until_module).unwrap();
        assert_eq!(split.vertex.as_ref(), "root.m1.web");
        assert_eq!(split.rest, "dest");
    }

    #[test]
    fn traverse_descends_into_children() {
        let mut g = graph_of(&["root.m1.module", "root.m1.web", "root.m2.module", "root.m2.app"]);
        // an explicit dependency edge lets the reference escape its scope
        g.connect("root.m2.app", "root.m1.web").unwrap();
        let split =
            vertex_split_traverse(&g, "web.dest", "root.m2.app", &traverse_until_module).unwrap();
        assert_eq!(split.vertex.as_ref(), "root.m1.web");
        assert_eq!(split.rest, "dest");
    }

    #[test]
    fn traverse_blocked_by_module_boundary() {
        let g = graph_of(&[
            "root.m1.module",
            "root.m1.file.x",
            "root.m2.module",
            "root.m2.file.y",
        ]);
        let found = vertex_split_traverse(
            &g,
            "file.x.dest",
            "root.m2.file.y",
            &traverse_until_module,
        );
        assert!(found.is_none());
    }

    #[test]
    fn traverse_resolves_multi_segment_sibling() {
        let g = graph_of(&[
            "root.m1.module",
            "root.m1.file.x",
            "root.m1.file.y",
        ]);
        let split = vertex_split_traverse(
            &g,
            "file.x.dest",
            "root.m1.file.y",
            &traverse_until_module,
        )
        .unwrap();
        assert_eq!(split.vertex.as_ref(), "root.m1.file.x");
        assert_eq!(split.rest, "dest");
    }

    #[test]
    fn traverse_survives_shared_descendants() {
        let mut g = graph_of(&["root.a", "root.b", "root.shared"]);
        g.connect("root.a", "root.shared").unwrap();
        g.connect("root.b", "root.shared").unwrap();
        g.connect("root.a", "root.b").unwrap();
        let split = vertex_split_traverse(&g, "b", "root.a", &traverse_until_module).unwrap();
        assert_eq!(split.vertex.as_ref(), "root.b");
    }

    #[test]
    fn scoped_desugar_reports_missing_vertex() {
        let g = graph_of(&["root.m1.module", "root.m1.web"]);
        let err = desugar_call_scoped(&g, "db.port", "root.m1.web").unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingVertex {
                path: "db.port".to_string()
            }
        );
    }
}

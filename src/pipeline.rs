//! Render pipeline: dependency-ordered prepare with bounded concurrency
//!
//! The driver validates the graph, then walks it in ready-set waves: every
//! vertex whose dependencies have rendered is spawned onto the runtime, with
//! a semaphore bounding how many prepares run at once. Rendering a vertex
//! substitutes its template directives and materializes its task in the
//! store. A vertex renders exactly once; re-running over a fully-rendered
//! store is a no-op.
//!
//! Failure policy: the first failure halts scheduling unless best-effort
//! mode is on, in which case the vertex is marked failed and its transitive
//! dependents are skipped. Cancellation is cooperative: the token is checked
//! before each vertex and handed into every prepare call.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::graph::{Graph, GraphError};
use crate::preprocess::desugar_call_scoped;
use crate::resource::{CancelToken, PrepareError, Value};
use crate::store::{RenderStore, RenderedVertex, VertexStatus};
use crate::template::{reference_heads, Head, RenderError, Renderer};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("render failed for {vertex}: {source}")]
    Render {
        vertex: String,
        #[source]
        source: RenderError,
    },

    #[error("prepare failed for {vertex}: {source}")]
    Prepare {
        vertex: String,
        #[source]
        source: PrepareError,
    },

    #[error("prepare for {vertex} timed out after {timeout:?}")]
    Timeout { vertex: String, timeout: Duration },
}

/// Driver knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on concurrently-preparing vertices.
    pub max_workers: usize,
    /// Per-vertex prepare timeout.
    pub prepare_timeout: Duration,
    /// Keep going after a failure, skipping only the failed subtree.
    pub best_effort: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            prepare_timeout: Duration::from_secs(300),
            best_effort: false,
        }
    }
}

impl PipelineConfig {
    /// Tighter limits for tests.
    pub fn testing() -> Self {
        Self {
            max_workers: 2,
            prepare_timeout: Duration::from_secs(10),
            best_effort: false,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Outcome counts plus per-vertex statuses after a run.
#[derive(Debug)]
pub struct RunSummary {
    pub statuses: Vec<(Arc<str>, VertexStatus)>,
    pub rendered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
    pub failures: Vec<(Arc<str>, String)>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.aborted == 0
    }
}

/// Discover the dependency edges implied by template references and add them
/// to the graph, so that every lookup target renders before its consumer.
///
/// Scans each vertex's string fields for `lookup` and `noderef` directives,
/// resolves them the way the renderer will, and connects the edges. Bad
/// directive syntax and unresolvable references fail here, before any
/// rendering starts.
pub fn wire_references(graph: &mut Graph) -> Result<(), PipelineError> {
    let ids: Vec<Arc<str>> = graph.vertices().cloned().collect();
    let mut edges: Vec<(Arc<str>, Arc<str>)> = Vec::new();

    for id in &ids {
        let meta = graph.get(id).expect("listed vertex exists");
        let preparer = Arc::clone(meta.preparer());

        for def in preparer.field_defs() {
            let Some(Value::Str(raw)) = preparer.raw_field(def.name) else {
                continue;
            };
            if !raw.contains("{{") {
                continue;
            }
            let heads = reference_heads(&raw).map_err(|detail| PipelineError::Render {
                vertex: id.to_string(),
                source: RenderError::Syntax {
                    vertex: id.to_string(),
                    detail,
                },
            })?;

            for head in heads {
                let target = match head {
                    Head::Param(_) => continue,
                    Head::Lookup(path) => desugar_call_scoped(graph, &path, id)
                        .map_err(|e| PipelineError::Render {
                            vertex: id.to_string(),
                            source: RenderError::Resolve {
                                vertex: id.to_string(),
                                directive: format!("lookup {path}"),
                                source: e,
                            },
                        })?
                        .vertex,
                    Head::NodeRef(target) => {
                        graph
                            .resolve_id(&target)
                            .ok_or_else(|| PipelineError::Render {
                                vertex: id.to_string(),
                                source: RenderError::Resolve {
                                    vertex: id.to_string(),
                                    directive: format!("noderef {target:?}"),
                                    source: crate::preprocess::ResolveError::MissingVertex {
                                        path: target.clone(),
                                    },
                                },
                            })?
                    }
                };
                if target.as_ref() != id.as_ref() {
                    edges.push((Arc::clone(id), target));
                }
            }
        }
    }

    for (from, to) in edges {
        graph.connect(&from, &to)?;
    }
    Ok(())
}

/// The render pass driver.
pub struct Pipeline {
    graph: Arc<Graph>,
    store: RenderStore,
    config: PipelineConfig,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(graph: Graph, config: PipelineConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            store: RenderStore::new(),
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn store(&self) -> &RenderStore {
        &self.store
    }

    /// Handle for cancelling the run from another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Render every vertex in dependency order.
    ///
    /// Cancellation leaves already-rendered vertices in the store and marks
    /// the rest aborted; the summary reports the split.
    #[instrument(skip(self), fields(vertices = self.graph.len()))]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        // cycles are fatal to the whole run
        self.graph.topo_order()?;
        info!(vertices = self.graph.len(), "starting render pass");

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut first_error: Option<PipelineError> = None;

        'waves: loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if first_error.is_some() && !self.config.best_effort {
                break;
            }

            let mut progressed = false;
            let mut ready: Vec<Arc<str>> = Vec::new();
            for id in self.graph.vertices() {
                if self.store.contains(id) {
                    continue;
                }
                let deps = self.graph.children(id);
                if deps.iter().all(|d| self.store.is_rendered(d)) {
                    ready.push(Arc::clone(id));
                } else if let Some(bad) = deps
                    .iter()
                    .find(|d| self.store.contains(d) && !self.store.is_rendered(d))
                {
                    self.store
                        .insert(Arc::clone(id), RenderedVertex::skipped(bad));
                    progressed = true;
                }
            }

            if ready.is_empty() {
                if progressed {
                    continue 'waves;
                }
                break;
            }

            let mut join_set = JoinSet::new();
            for id in ready {
                let graph = Arc::clone(&self.graph);
                let store = self.store.clone();
                let cancel = self.cancel.clone();
                let semaphore = Arc::clone(&semaphore);
                let timeout = self.config.prepare_timeout;

                join_set.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closes");
                    if cancel.is_cancelled() {
                        return (id, RenderedVertex::aborted(), None);
                    }

                    let meta = graph.get(&id).expect("scheduled vertex exists");
                    let preparer = Arc::clone(meta.preparer());
                    let renderer =
                        Renderer::new(Arc::clone(&graph), store.clone(), Arc::clone(&id));

                    match tokio::time::timeout(timeout, preparer.prepare(&renderer, &cancel)).await
                    {
                        Ok(Ok(task)) => {
                            debug!(vertex = %id, "rendered");
                            (id, RenderedVertex::rendered(task), None)
                        }
                        Ok(Err(PrepareError::Aborted)) => (id, RenderedVertex::aborted(), None),
                        Ok(Err(source)) => {
                            let err = PipelineError::Prepare {
                                vertex: id.to_string(),
                                source,
                            };
                            let outcome = RenderedVertex::failed(err.to_string());
                            (id, outcome, Some(err))
                        }
                        Err(_) => {
                            let err = PipelineError::Timeout {
                                vertex: id.to_string(),
                                timeout,
                            };
                            let outcome = RenderedVertex::failed(err.to_string());
                            (id, outcome, Some(err))
                        }
                    }
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (id, outcome, error) = joined.expect("render worker never panics");
                self.store.insert(id, outcome);
                if let Some(err) = error {
                    warn!(%err, "vertex failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            for id in self.graph.vertices() {
                if !self.store.contains(id) {
                    self.store.insert(Arc::clone(id), RenderedVertex::aborted());
                }
            }
        }

        match first_error {
            Some(err) if !self.config.best_effort => Err(err),
            _ => Ok(self.summarize()),
        }
    }

    fn summarize(&self) -> RunSummary {
        let statuses = self.store.statuses();
        let mut summary = RunSummary {
            rendered: 0,
            failed: 0,
            skipped: 0,
            aborted: 0,
            failures: Vec::new(),
            statuses: Vec::new(),
        };
        for (id, status) in &statuses {
            match status {
                VertexStatus::Rendered => summary.rendered += 1,
                VertexStatus::Failed => {
                    summary.failed += 1;
                    let detail = self
                        .store
                        .get(id)
                        .and_then(|v| v.error)
                        .unwrap_or_default();
                    summary.failures.push((Arc::clone(id), detail));
                }
                VertexStatus::Skipped => summary.skipped += 1,
                VertexStatus::Aborted => summary.aborted += 1,
            }
        }
        summary.statuses = statuses;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::file::FilePreparer;
    use crate::resource::shell::ShellPreparer;
    use crate::resource::Preparer;

    fn add(graph: &mut Graph, id: &str, prep: impl Preparer + 'static) {
        graph.add(id, Arc::new(prep)).unwrap();
    }

    #[test]
    fn wire_references_adds_lookup_edges() {
        let mut g = Graph::new();
        add(&mut g, "root.web", FilePreparer::new("/srv/www", "hello"));
        add(
            &mut g,
            "root.app",
            ShellPreparer::with_check("test -d {{lookup web.dest}}"),
        );
        wire_references(&mut g).unwrap();
        let deps: Vec<&str> = g.children("root.app").iter().map(|d| d.as_ref()).collect();
        assert_eq!(deps, vec!["root.web"]);
    }

    #[test]
    fn wire_references_rejects_missing_target() {
        let mut g = Graph::new();
        add(
            &mut g,
            "root.app",
            ShellPreparer::with_check("test -d {{lookup web.dest}}"),
        );
        let err = wire_references(&mut g).unwrap_err();
        assert!(matches!(err, PipelineError::Render { .. }));
    }

    #[test]
    fn wire_references_rejects_bad_syntax() {
        let mut g = Graph::new();
        add(
            &mut g,
            "root.app",
            ShellPreparer::with_check("oops {{frobnicate}}"),
        );
        let err = wire_references(&mut g).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Render {
                source: RenderError::Syntax { .. },
                ..
            }
        ));
    }

    #[test]
    fn config_defaults_are_bounded() {
        let config = PipelineConfig::default();
        assert!(config.max_workers > 0);
        assert!(!config.best_effort);
        assert!(PipelineConfig::testing().max_workers <= config.max_workers);
    }
}

//! Render results store with DashMap
//!
//! One entry per vertex, written exactly once by the worker that rendered
//! it. The graph structure is frozen during the render pass, so this store
//! is the only shared mutable state besides the field-map cache.

use std::sync::Arc;

use dashmap::DashMap;

use crate::fields::Record;
use crate::resource::Task;

/// Terminal state of a vertex after the render pass touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexStatus {
    /// Templates substituted and the task materialized.
    Rendered,
    /// Render or prepare failed.
    Failed,
    /// A transitive dependency failed, so this vertex never ran.
    Skipped,
    /// Cancellation hit before or during this vertex's prepare.
    Aborted,
}

/// Outcome of rendering one vertex.
#[derive(Clone)]
pub struct RenderedVertex {
    pub status: VertexStatus,
    pub task: Option<Arc<dyn Task>>,
    pub error: Option<String>,
}

impl RenderedVertex {
    pub fn rendered(task: Arc<dyn Task>) -> Self {
        Self {
            status: VertexStatus::Rendered,
            task: Some(task),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: VertexStatus::Failed,
            task: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped(because: &str) -> Self {
        Self {
            status: VertexStatus::Skipped,
            task: None,
            error: Some(format!("dependency {because} did not render")),
        }
    }

    pub fn aborted() -> Self {
        Self {
            status: VertexStatus::Aborted,
            task: None,
            error: None,
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.status == VertexStatus::Rendered
    }
}

/// Thread-safe storage for render results (lock-free reads and writes).
#[derive(Clone, Default)]
pub struct RenderStore {
    inner: Arc<DashMap<Arc<str>, RenderedVertex>>,
}

impl RenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First write wins: a vertex renders exactly once.
    pub fn insert(&self, id: Arc<str>, outcome: RenderedVertex) {
        self.inner.entry(id).or_insert(outcome);
    }

    pub fn get(&self, id: &str) -> Option<RenderedVertex> {
        self.inner.get(id).map(|entry| entry.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    pub fn is_rendered(&self, id: &str) -> bool {
        self.inner
            .get(id)
            .map(|entry| entry.is_rendered())
            .unwrap_or(false)
    }

    /// Introspectable view of a rendered vertex's task.
    pub fn record(&self, id: &str) -> Option<Arc<dyn Record>> {
        self.inner
            .get(id)
            .and_then(|entry| entry.task.clone())
            .map(|task| task as Arc<dyn Record>)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of (vertex, status) pairs for reporting.
    pub fn statuses(&self) -> Vec<(Arc<str>, VertexStatus)> {
        let mut all: Vec<(Arc<str>, VertexStatus)> = self
            .inner
            .iter()
            .map(|entry| (Arc::clone(entry.key()), entry.value().status.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::shell::ShellTask;

    fn task() -> Arc<dyn Task> {
        Arc::new(ShellTask::check_only("true"))
    }

    #[test]
    fn insert_and_get() {
        let store = RenderStore::new();
        store.insert(Arc::from("root.a"), RenderedVertex::rendered(task()));

        assert!(store.is_rendered("root.a"));
        assert!(store.record("root.a").is_some());
        assert!(store.get("root.missing").is_none());
    }

    #[test]
    fn first_write_wins() {
        let store = RenderStore::new();
        store.insert(Arc::from("root.a"), RenderedVertex::failed("boom"));
        store.insert(Arc::from("root.a"), RenderedVertex::rendered(task()));

        let entry = store.get("root.a").unwrap();
        assert_eq!(entry.status, VertexStatus::Failed);
    }

    #[test]
    fn skipped_records_the_dependency() {
        let store = RenderStore::new();
        store.insert(Arc::from("root.b"), RenderedVertex::skipped("root.a"));

        let entry = store.get("root.b").unwrap();
        assert_eq!(entry.status, VertexStatus::Skipped);
        assert!(entry.error.unwrap().contains("root.a"));
    }

    #[test]
    fn statuses_sorted_by_id() {
        let store = RenderStore::new();
        store.insert(Arc::from("root.b"), RenderedVertex::aborted());
        store.insert(Arc::from("root.a"), RenderedVertex::rendered(task()));

        let statuses = store.statuses();
        assert_eq!(statuses[0].0.as_ref(), "root.a");
        assert_eq!(statuses[1].1, VertexStatus::Aborted);
    }
}

//! Attune - graph-based configuration convergence engine
//!
//! ## Architecture
//!
//! - `graph`: dependency graph with hierarchical dot-path ids
//! - `fields`: structural field access over resource records, with a
//!   process-wide case-fold cache
//! - `preprocess`: longest-prefix and scope-aware reference resolution
//! - `template`: `{{lookup ...}}` / `{{param ...}}` directive rendering
//! - `store`: thread-safe render results (DashMap)
//! - `pipeline`: dependency-ordered render pass with tokio concurrency
//! - `registry`: resource kind registration
//! - `resource`: preparer/task contracts and builtin kinds
//! - `error`: unified error surface
//!
//! ## Flow
//!
//! Parsed nodes are added to a [`graph::Graph`], template references are
//! wired into dependency edges ([`pipeline::wire_references`]), and the
//! [`pipeline::Pipeline`] renders every vertex in dependency order: each
//! vertex's directives are substituted against already-rendered neighbors,
//! then its preparer validates the result and materializes a task.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use attune::graph::Graph;
//! use attune::pipeline::{wire_references, Pipeline, PipelineConfig};
//! use attune::resource::file::FilePreparer;
//! use attune::resource::shell::ShellPreparer;
//!
//! # #[tokio::main] async fn main() -> Result<(), attune::EngineError> {
//! attune::registry::register_builtins();
//!
//! let mut graph = Graph::new();
//! graph.add("root.web", Arc::new(FilePreparer::new("/srv/www", "hello")))?;
//! graph.add(
//!     "root.check",
//!     Arc::new(ShellPreparer::with_check("test -d {{lookup web.dest}}")),
//! )?;
//! wire_references(&mut graph)?;
//!
//! let pipeline = Pipeline::new(graph, PipelineConfig::default());
//! let summary = pipeline.run().await?;
//! assert!(summary.is_clean());
//! # Ok(()) }
//! ```

pub mod error;
pub mod fields;
pub mod graph;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod resource;
pub mod store;
pub mod template;

pub use error::EngineError;
pub use fields::{eval_terms, field_map, FieldDef, FieldError, Record};
pub use graph::{Graph, GraphError};
pub use pipeline::{wire_references, Pipeline, PipelineConfig, RunSummary};
pub use preprocess::{desugar_call, prefixes, vertex_split, vertex_split_traverse, ResolveError};
pub use registry::{register_builtins, Registry, RegistryEntry, RegistryError};
pub use resource::{CancelToken, PrepareError, Preparer, Render, Task, ValidationError, Value};
pub use store::{RenderStore, VertexStatus};
pub use template::{Renderer, RenderError};

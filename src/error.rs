//! Unified error surface
//!
//! Each layer keeps its own error enum close to the code that raises it:
//!
//! - `graph`: structural mutations and cycle detection
//! - `fields`: field lookup and path traversal
//! - `preprocess`: reference resolution
//! - `template`: rendering, with vertex and directive context attached
//! - `resource`: preparer validation
//! - `registry`: kind registration and binding
//! - `pipeline`: driver aggregation, timeouts
//!
//! [`EngineError`] wraps them for callers that want a single error type at
//! the crate boundary.

use thiserror::Error;

use crate::fields::FieldError;
use crate::graph::GraphError;
use crate::pipeline::PipelineError;
use crate::preprocess::ResolveError;
use crate::registry::RegistryError;
use crate::resource::{PrepareError, ValidationError};
use crate::template::RenderError;

/// Top-level error for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Field(#[from] FieldError),

    #[error("{0}")]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Render(#[from] RenderError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Prepare(#[from] PrepareError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl EngineError {
    /// True for failures that may clear up after more rendering completes.
    pub fn is_pending(&self) -> bool {
        match self {
            EngineError::Field(FieldError::Unresolvable) => true,
            EngineError::Render(e) => e.is_pending(),
            _ => false,
        }
    }
}

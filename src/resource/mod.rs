//! Resource contracts and builtin kinds
//!
//! A resource kind contributes two halves: a [`Preparer`] that validates its
//! rendered inputs and a [`Task`] that the execution layer later checks and
//! applies. Both are introspectable records; the engine core treats them as
//! opaque structured values.
//!
//! Builtin kinds:
//!
//! | Kind | Module |
//! |------|--------|
//! | `module` | [`module`] |
//! | `task` | [`shell`] |
//! | `file.content` | [`file`] |
//! | `user.user` | [`user`] |
//! | `wait.query` | [`wait`] |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::fields::Record;
use crate::template::RenderError;

pub mod file;
pub mod module;
pub mod shell;
pub mod user;
pub mod value;
pub mod wait;

pub use value::Value;

/// A preparer rejected its inputs.
#[derive(Debug, Error, PartialEq)]
#[error("invalid value for \"{field}\": {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from [`Preparer::prepare`].
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("prepare aborted by cancellation")]
    Aborted,
}

/// Cooperative cancellation flag shared between the driver and preparers.
///
/// Preparers doing slow work should poll it between steps and bail out with
/// [`PrepareError::Aborted`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What the engine exposes to preparers: field-value retrieval for the
/// current vertex with templates already substituted.
pub trait Render: Send + Sync {
    /// Render one raw field value, substituting every directive.
    fn render(&self, field: &str, raw: &str) -> Result<String, RenderError>;
}

/// The input-validation half of a resource kind. Validates the rendered
/// record and produces the runnable task.
#[async_trait]
pub trait Preparer: Record {
    async fn prepare(
        &self,
        render: &dyn Render,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn Task>, PrepareError>;
}

/// The executable half of a resource kind. Check and apply live with the
/// execution layer; the engine only stores and introspects tasks.
pub trait Task: Record {
    /// One-line summary of what applying this task would change.
    fn summary(&self) -> String;
}

/// Enforce the declared field constraints: required fields, mutually
/// exclusive groups, and enumerated valid values.
///
/// A field counts as set when its value is neither null nor the empty
/// string.
pub fn validate_fields(record: &dyn Record) -> Result<(), ValidationError> {
    let mut groups: FxHashMap<&'static str, Vec<&'static str>> = FxHashMap::default();

    for def in record.field_defs() {
        let value = record.raw_field(def.name).unwrap_or(Value::Null);
        let set = match &value {
            Value::Null => false,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        };

        if def.required && !set {
            return Err(ValidationError::new(def.name, "field is required"));
        }
        if !set {
            continue;
        }

        if let Some(group) = def.exclusive {
            groups.entry(group).or_default().push(def.name);
        }

        if !def.valid.is_empty() {
            if let Value::Str(s) = &value {
                if !def.valid.contains(&s.as_ref()) {
                    return Err(ValidationError::new(
                        def.name,
                        format!("must be one of {:?}, got \"{}\"", def.valid, s),
                    ));
                }
            }
        }
    }

    for (group, set_fields) in groups {
        if set_fields.len() > 1 {
            return Err(ValidationError::new(
                set_fields[1],
                format!("fields {:?} are mutually exclusive ({})", set_fields, group),
            ));
        }
    }
    Ok(())
}

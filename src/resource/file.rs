//! The `file.content` resource kind
//!
//! Renders file content to a destination path. Mode is validated as an
//! octal string at prepare time; the execution layer applies it.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::fields::{FieldDef, Record};
use crate::registry::{RegistryEntry, RegistryError};
use crate::resource::{
    validate_fields, CancelToken, PrepareError, Preparer, Render, Task, ValidationError, Value,
};

pub const KIND: &str = "file.content";

static FILE_FIELDS: [FieldDef; 3] = [
    FieldDef::scalar("dest").required(),
    FieldDef::scalar("content"),
    FieldDef::scalar("mode"),
];

/// Parse-time record for file content.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilePreparer {
    pub dest: Option<String>,
    pub content: Option<String>,
    pub mode: Option<String>,
}

impl FilePreparer {
    pub fn new(dest: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            dest: Some(dest.into()),
            content: Some(content.into()),
            mode: None,
        }
    }
}

impl Record for FilePreparer {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &FILE_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "dest" => Some(Value::from(self.dest.clone())),
            "content" => Some(Value::from(self.content.clone())),
            "mode" => Some(Value::from(self.mode.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Preparer for FilePreparer {
    async fn prepare(
        &self,
        render: &dyn Render,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn Task>, PrepareError> {
        if cancel.is_cancelled() {
            return Err(PrepareError::Aborted);
        }
        validate_fields(self)?;

        let dest = render.render("dest", self.dest.as_deref().unwrap_or(""))?;
        let content = render.render("content", self.content.as_deref().unwrap_or(""))?;
        let mode = match &self.mode {
            Some(mode) => {
                let rendered = render.render("mode", mode)?;
                u32::from_str_radix(&rendered, 8).map_err(|_| {
                    ValidationError::new("mode", format!("\"{rendered}\" is not an octal mode"))
                })?;
                Some(rendered)
            }
            None => None,
        };

        Ok(Arc::new(FileTask {
            dest,
            content,
            mode,
        }))
    }
}

/// Rendered file task.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub dest: String,
    pub content: String,
    pub mode: Option<String>,
}

impl Record for FileTask {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &FILE_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "dest" => Some(Value::from(self.dest.clone())),
            "content" => Some(Value::from(self.content.clone())),
            "mode" => Some(Value::from(self.mode.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Task for FileTask {
    fn summary(&self) -> String {
        format!("write {} bytes to {}", self.content.len(), self.dest)
    }
}

pub fn registry_entry() -> RegistryEntry {
    RegistryEntry {
        kind: KIND,
        bind: |body| {
            let prep: FilePreparer =
                serde_json::from_value(body.clone()).map_err(|e| RegistryError::Bind {
                    kind: KIND.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(Arc::new(prep))
        },
        schema: || &FILE_FIELDS,
    }
}

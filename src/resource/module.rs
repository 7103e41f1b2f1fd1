//! The `module` resource kind
//!
//! A module groups other resources and acts as the scope boundary for name
//! resolution: lookups never cross the nearest enclosing module, and `param`
//! directives resolve against its declared parameters. Expansion merges
//! call-site arguments over the declared defaults before the module lands in
//! the graph.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::fields::{FieldDef, Record};
use crate::registry::{RegistryEntry, RegistryError};
use crate::resource::{
    CancelToken, PrepareError, Preparer, Render, Task, ValidationError, Value,
};

pub const KIND: &str = "module";

/// Trailing id segment conventionally naming a scope's module vertex, e.g.
/// `root.m1.module` for scope `root.m1`.
pub const MARKER_LEAF: &str = "module";

static MODULE_FIELDS: [FieldDef; 1] = [FieldDef::scalar("params")];

/// Parse-time module record: declared parameters with their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModulePreparer {
    pub params: IndexMap<String, serde_json::Value>,
}

impl ModulePreparer {
    pub fn new(params: IndexMap<String, serde_json::Value>) -> Self {
        Self { params }
    }

    /// Value of a declared parameter.
    pub fn param(&self, name: &str) -> Option<Value> {
        self.params.get(name).map(Value::from_json)
    }

    /// Merge call-site arguments over the declared defaults. Arguments for
    /// undeclared parameters are rejected.
    pub fn with_args(
        mut self,
        args: IndexMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        for (name, value) in args {
            if !self.params.contains_key(&name) {
                return Err(ValidationError::new(
                    name,
                    "module does not declare this parameter",
                ));
            }
            self.params.insert(name, value);
        }
        Ok(self)
    }
}

impl Record for ModulePreparer {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &MODULE_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "params" => Some(Value::from(
                serde_json::to_string(&self.params).unwrap_or_default(),
            )),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Preparer for ModulePreparer {
    async fn prepare(
        &self,
        _render: &dyn Render,
        _cancel: &CancelToken,
    ) -> Result<Arc<dyn Task>, PrepareError> {
        Ok(Arc::new(ModuleTask {
            params: self.params.clone(),
        }))
    }
}

/// Rendered module: parameters frozen for downstream introspection.
#[derive(Debug, Clone)]
pub struct ModuleTask {
    pub params: IndexMap<String, serde_json::Value>,
}

impl Record for ModuleTask {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &MODULE_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "params" => Some(Value::from(
                serde_json::to_string(&self.params).unwrap_or_default(),
            )),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Task for ModuleTask {
    fn summary(&self) -> String {
        format!("module with {} parameters", self.params.len())
    }
}

pub fn registry_entry() -> RegistryEntry {
    RegistryEntry {
        kind: KIND,
        bind: |body| {
            let prep: ModulePreparer =
                serde_json::from_value(body.clone()).map_err(|e| RegistryError::Bind {
                    kind: KIND.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(Arc::new(prep))
        },
        schema: || &MODULE_FIELDS,
    }
}

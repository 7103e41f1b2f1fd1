//! The `task` resource kind: shell check and apply statements
//!
//! The prepared task embeds its command generator; the generator's fields
//! (interpreter, dir, flags) are lifted into the task's namespace, so
//! references like `task.go-dl.dir` resolve through the embedding.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::fields::{FieldDef, Record};
use crate::registry::{RegistryEntry, RegistryError};
use crate::resource::{
    validate_fields, CancelToken, PrepareError, Preparer, Render, Task, ValidationError, Value,
};

pub const KIND: &str = "task";

const DEFAULT_INTERPRETER: &str = "/bin/sh";

static PREPARER_FIELDS: [FieldDef; 4] = [
    FieldDef::scalar("check"),
    FieldDef::scalar("apply"),
    FieldDef::scalar("dir"),
    FieldDef::scalar("interpreter"),
];

/// Parse-time record for a shell task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShellPreparer {
    pub check: Option<String>,
    pub apply: Option<String>,
    pub dir: Option<String>,
    pub interpreter: Option<String>,
}

impl ShellPreparer {
    pub fn with_check(check: impl Into<String>) -> Self {
        Self {
            check: Some(check.into()),
            ..Self::default()
        }
    }

    pub fn with_apply(mut self, apply: impl Into<String>) -> Self {
        self.apply = Some(apply.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl Record for ShellPreparer {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &PREPARER_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "check" => Some(Value::from(self.check.clone())),
            "apply" => Some(Value::from(self.apply.clone())),
            "dir" => Some(Value::from(self.dir.clone())),
            "interpreter" => Some(Value::from(self.interpreter.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Preparer for ShellPreparer {
    async fn prepare(
        &self,
        render: &dyn Render,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn Task>, PrepareError> {
        if cancel.is_cancelled() {
            return Err(PrepareError::Aborted);
        }
        validate_fields(self)?;
        if self.check.is_none() && self.apply.is_none() {
            return Err(ValidationError::new(
                "check",
                "at least one of \"check\" or \"apply\" is required",
            )
            .into());
        }

        let check = render.render("check", self.check.as_deref().unwrap_or(""))?;
        let apply = render.render("apply", self.apply.as_deref().unwrap_or(""))?;
        let dir = match &self.dir {
            Some(dir) => Some(render.render("dir", dir)?),
            None => None,
        };

        let cmd = CmdSpec {
            interpreter: self
                .interpreter
                .clone()
                .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
            flags: vec!["-c".to_string()],
            dir,
        };
        Ok(Arc::new(ShellTask {
            cmd: Some(Arc::new(cmd)),
            check,
            apply,
        }))
    }
}

static CMD_FIELDS: [FieldDef; 3] = [
    FieldDef::scalar("interpreter"),
    FieldDef::scalar("flags"),
    FieldDef::scalar("dir"),
];

/// How the shell statements get executed: interpreter, flags, working dir.
#[derive(Debug, Clone)]
pub struct CmdSpec {
    pub interpreter: String,
    pub flags: Vec<String>,
    pub dir: Option<String>,
}

impl Record for CmdSpec {
    fn type_name(&self) -> &'static str {
        "task.cmd"
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &CMD_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "interpreter" => Some(Value::from(self.interpreter.clone())),
            "flags" => Some(Value::List(
                self.flags.iter().map(|f| Value::from(f.clone())).collect(),
            )),
            "dir" => Some(Value::from(self.dir.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

static TASK_FIELDS: [FieldDef; 3] = [
    FieldDef::embedded("cmd", || &CMD_FIELDS),
    FieldDef::scalar("check"),
    FieldDef::scalar("apply"),
];

/// Rendered shell task.
#[derive(Debug, Clone)]
pub struct ShellTask {
    pub cmd: Option<Arc<CmdSpec>>,
    pub check: String,
    pub apply: String,
}

impl ShellTask {
    /// A bare task with only a check statement and no command generator.
    pub fn check_only(check: impl Into<String>) -> Self {
        Self {
            cmd: None,
            check: check.into(),
            apply: String::new(),
        }
    }
}

impl Record for ShellTask {
    fn type_name(&self) -> &'static str {
        "task.shell"
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &TASK_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "cmd" => Some(match &self.cmd {
                Some(cmd) => Value::Record(Arc::clone(cmd) as Arc<dyn Record>),
                None => Value::Null,
            }),
            "check" => Some(Value::from(self.check.clone())),
            "apply" => Some(Value::from(self.apply.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Task for ShellTask {
    fn summary(&self) -> String {
        if self.apply.is_empty() {
            format!("check: {}", self.check)
        } else {
            format!("apply: {}", self.apply)
        }
    }
}

pub fn registry_entry() -> RegistryEntry {
    RegistryEntry {
        kind: KIND,
        bind: |body| {
            let prep: ShellPreparer =
                serde_json::from_value(body.clone()).map_err(|e| RegistryError::Bind {
                    kind: KIND.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(Arc::new(prep))
        },
        schema: || &PREPARER_FIELDS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{eval_terms, field_map};

    struct NoTemplates;

    impl Render for NoTemplates {
        fn render(&self, _field: &str, raw: &str) -> Result<String, crate::template::RenderError> {
            Ok(raw.to_string())
        }
    }

    #[tokio::test]
    async fn prepare_builds_task_with_cmd() {
        let prep = ShellPreparer::with_check("test -d /opt/go")
            .with_apply("curl -O https://example.com/go.tgz")
            .in_dir("/opt");
        let task = prep.prepare(&NoTemplates, &CancelToken::new()).await.unwrap();

        let map = field_map(task.as_ref() as &dyn Record);
        assert_eq!(map.get("dir"), Some(&Value::from("/opt")));
        assert_eq!(map.get("interpreter"), Some(&Value::from(DEFAULT_INTERPRETER)));
    }

    #[tokio::test]
    async fn prepare_requires_a_statement() {
        let err = ShellPreparer::default()
            .prepare(&NoTemplates, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::Validation(_)));
    }

    #[tokio::test]
    async fn prepare_honors_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = ShellPreparer::with_check("true")
            .prepare(&NoTemplates, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::Aborted));
    }

    #[test]
    fn nil_cmd_is_unresolvable_not_missing() {
        let task: Arc<dyn Record> = Arc::new(ShellTask::check_only("true"));

        // the embedded record's own name stays accessible but yields null
        let err = eval_terms(&Value::Record(Arc::clone(&task)), &["cmd", "dir"]).unwrap_err();
        assert_eq!(err, crate::fields::FieldError::Unresolvable);

        // nothing was lifted from the nil embedding
        let err = eval_terms(&Value::Record(task), &["dir"]).unwrap_err();
        assert!(matches!(err, crate::fields::FieldError::MissingField { .. }));
    }
}

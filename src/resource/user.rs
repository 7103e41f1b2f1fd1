//! The `user.user` resource kind
//!
//! Manages a system user. `gid` and `groupname` are mutually exclusive ways
//! to pick the primary group; `state` decides presence.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::fields::{FieldDef, Record};
use crate::registry::{RegistryEntry, RegistryError};
use crate::resource::{
    validate_fields, CancelToken, PrepareError, Preparer, Render, Task, ValidationError, Value,
};

pub const KIND: &str = "user.user";

pub const STATE_PRESENT: &str = "present";
pub const STATE_ABSENT: &str = "absent";

static USER_FIELDS: [FieldDef; 9] = [
    FieldDef::scalar("username").required(),
    FieldDef::scalar("new_username"),
    FieldDef::scalar("uid"),
    FieldDef::scalar("groupname").exclusive("group"),
    FieldDef::scalar("gid").exclusive("group"),
    FieldDef::scalar("name"),
    FieldDef::scalar("home_dir"),
    FieldDef::scalar("move_dir"),
    FieldDef::scalar("state").valid(&[STATE_PRESENT, STATE_ABSENT]),
];

/// Parse-time record for a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserPreparer {
    pub username: Option<String>,
    pub new_username: Option<String>,
    pub uid: Option<u32>,
    pub groupname: Option<String>,
    pub gid: Option<u32>,
    pub name: Option<String>,
    pub home_dir: Option<String>,
    pub move_dir: bool,
    pub state: Option<String>,
}

impl UserPreparer {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }
}

impl Record for UserPreparer {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &USER_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "username" => Some(Value::from(self.username.clone())),
            "new_username" => Some(Value::from(self.new_username.clone())),
            "uid" => Some(Value::from(self.uid)),
            "groupname" => Some(Value::from(self.groupname.clone())),
            "gid" => Some(Value::from(self.gid)),
            "name" => Some(Value::from(self.name.clone())),
            "home_dir" => Some(Value::from(self.home_dir.clone())),
            "move_dir" => Some(Value::from(self.move_dir)),
            "state" => Some(Value::from(self.state.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Preparer for UserPreparer {
    async fn prepare(
        &self,
        render: &dyn Render,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn Task>, PrepareError> {
        if cancel.is_cancelled() {
            return Err(PrepareError::Aborted);
        }
        validate_fields(self)?;

        // the maximum id on linux is one below u32::MAX
        if self.uid == Some(u32::MAX) {
            return Err(ValidationError::new("uid", "parameter out of range").into());
        }
        if self.gid == Some(u32::MAX) {
            return Err(ValidationError::new("gid", "parameter out of range").into());
        }
        if self.move_dir && self.home_dir.is_none() {
            return Err(
                ValidationError::new("home_dir", "required when \"move_dir\" is set").into(),
            );
        }

        let render_opt = |field: &str, value: &Option<String>| -> Result<Option<String>, PrepareError> {
            match value {
                Some(raw) => Ok(Some(render.render(field, raw)?)),
                None => Ok(None),
            }
        };

        Ok(Arc::new(UserTask {
            username: render.render("username", self.username.as_deref().unwrap_or(""))?,
            new_username: render_opt("new_username", &self.new_username)?,
            uid: self.uid,
            groupname: render_opt("groupname", &self.groupname)?,
            gid: self.gid,
            name: render_opt("name", &self.name)?,
            home_dir: render_opt("home_dir", &self.home_dir)?,
            move_dir: self.move_dir,
            state: self
                .state
                .clone()
                .unwrap_or_else(|| STATE_PRESENT.to_string()),
        }))
    }
}

/// Rendered user task.
#[derive(Debug, Clone)]
pub struct UserTask {
    pub username: String,
    pub new_username: Option<String>,
    pub uid: Option<u32>,
    pub groupname: Option<String>,
    pub gid: Option<u32>,
    pub name: Option<String>,
    pub home_dir: Option<String>,
    pub move_dir: bool,
    pub state: String,
}

impl Record for UserTask {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &USER_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "username" => Some(Value::from(self.username.clone())),
            "new_username" => Some(Value::from(self.new_username.clone())),
            "uid" => Some(Value::from(self.uid)),
            "groupname" => Some(Value::from(self.groupname.clone())),
            "gid" => Some(Value::from(self.gid)),
            "name" => Some(Value::from(self.name.clone())),
            "home_dir" => Some(Value::from(self.home_dir.clone())),
            "move_dir" => Some(Value::from(self.move_dir)),
            "state" => Some(Value::from(self.state.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Task for UserTask {
    fn summary(&self) -> String {
        format!("user {} should be {}", self.username, self.state)
    }
}

pub fn registry_entry() -> RegistryEntry {
    RegistryEntry {
        kind: KIND,
        bind: |body| {
            let prep: UserPreparer =
                serde_json::from_value(body.clone()).map_err(|e| RegistryError::Bind {
                    kind: KIND.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(Arc::new(prep))
        },
        schema: || &USER_FIELDS,
    }
}

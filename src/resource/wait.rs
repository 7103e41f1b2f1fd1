//! The `wait.query` resource kind
//!
//! Polls a check statement until it passes or retries run out. Intervals
//! accept duration strings like "30s", "5m", "500ms".

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::fields::{FieldDef, Record};
use crate::registry::{RegistryEntry, RegistryError};
use crate::resource::{
    validate_fields, CancelToken, PrepareError, Preparer, Render, Task, ValidationError, Value,
};

pub const KIND: &str = "wait.query";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRY: u32 = 5;

/// Parse a duration string like "30s", "5m", "1h", "500ms". A bare number
/// means seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600));
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

static WAIT_FIELDS: [FieldDef; 4] = [
    FieldDef::scalar("check").required(),
    FieldDef::scalar("interval"),
    FieldDef::scalar("max_retry"),
    FieldDef::scalar("grace_period"),
];

/// Parse-time record for a wait query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WaitPreparer {
    pub check: Option<String>,
    pub interval: Option<String>,
    pub max_retry: Option<u32>,
    pub grace_period: Option<String>,
}

impl Record for WaitPreparer {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &WAIT_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "check" => Some(Value::from(self.check.clone())),
            "interval" => Some(Value::from(self.interval.clone())),
            "max_retry" => Some(Value::from(self.max_retry)),
            "grace_period" => Some(Value::from(self.grace_period.clone())),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Preparer for WaitPreparer {
    async fn prepare(
        &self,
        render: &dyn Render,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn Task>, PrepareError> {
        if cancel.is_cancelled() {
            return Err(PrepareError::Aborted);
        }
        validate_fields(self)?;

        let check = render.render("check", self.check.as_deref().unwrap_or(""))?;

        let parse_field = |field: &str, value: &Option<String>, default: Duration| {
            match value {
                Some(raw) => parse_duration(raw).ok_or_else(|| {
                    ValidationError::new(field, format!("\"{raw}\" is not a duration"))
                }),
                None => Ok(default),
            }
        };
        let interval = parse_field("interval", &self.interval, DEFAULT_INTERVAL)?;
        let grace_period = parse_field("grace_period", &self.grace_period, Duration::ZERO)?;

        Ok(Arc::new(WaitTask {
            check,
            interval,
            max_retry: self.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
            grace_period,
        }))
    }
}

/// Rendered wait task.
#[derive(Debug, Clone)]
pub struct WaitTask {
    pub check: String,
    pub interval: Duration,
    pub max_retry: u32,
    pub grace_period: Duration,
}

impl Record for WaitTask {
    fn type_name(&self) -> &'static str {
        KIND
    }
    fn field_defs(&self) -> &'static [FieldDef] {
        &WAIT_FIELDS
    }
    fn raw_field(&self, name: &str) -> Option<Value> {
        match name {
            "check" => Some(Value::from(self.check.clone())),
            "interval" => Some(Value::Int(self.interval.as_secs() as i64)),
            "max_retry" => Some(Value::from(self.max_retry)),
            "grace_period" => Some(Value::Int(self.grace_period.as_secs() as i64)),
            _ => None,
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Task for WaitTask {
    fn summary(&self) -> String {
        format!(
            "poll \"{}\" every {:?}, up to {} retries",
            self.check, self.interval, self.max_retry
        )
    }
}

pub fn registry_entry() -> RegistryEntry {
    RegistryEntry {
        kind: KIND,
        bind: |body| {
            let prep: WaitPreparer =
                serde_json::from_value(body.clone()).map_err(|e| RegistryError::Bind {
                    kind: KIND.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(Arc::new(prep))
        },
        schema: || &WAIT_FIELDS,
    }
}

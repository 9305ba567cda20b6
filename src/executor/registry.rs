//! Operation registry used to run tasks by name.
//!
//! A task only carries the *name* of its operation, which keeps it a plain
//! serializable value. Workers look the name up here to find the code to
//! run.

use super::task::{Task, TaskError, TaskResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Handler function type
pub type Handler = Arc<dyn Fn(&Value) -> TaskResult + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the stock operations:
    ///
    /// - `mul`, `add`: `[a, b]` integers
    /// - `echo`: returns the payload
    /// - `sleep`: `{"ms": n}`, returns `null`
    /// - `fail`: always fails, using the payload as message
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("mul", |payload| {
            let (a, b): (i64, i64) = args(payload)?;
            a.checked_mul(b)
                .map(Value::from)
                .ok_or_else(|| TaskError::failed(format!("{a} * {b} overflows")))
        });
        registry.register("add", |payload| {
            let (a, b): (i64, i64) = args(payload)?;
            a.checked_add(b)
                .map(Value::from)
                .ok_or_else(|| TaskError::failed(format!("{a} + {b} overflows")))
        });
        registry.register("echo", |payload| Ok(payload.clone()));
        registry.register("sleep", |payload| {
            let ms = payload
                .get("ms")
                .and_then(Value::as_u64)
                .ok_or_else(|| TaskError::invalid_payload("expected {\"ms\": <u64>}"))?;
            thread::sleep(Duration::from_millis(ms));
            Ok(Value::Null)
        });
        registry.register("fail", |payload| {
            let message = match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Err(TaskError::failed(message))
        });
        registry
    }

    /// Registers `handler` under `operation`, replacing any previous one.
    pub fn register<S, F>(&mut self, operation: S, handler: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&Value) -> TaskResult + Send + Sync + 'static,
    {
        self.handlers.insert(operation.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs the handler for `task.operation`.
    ///
    /// Panics from the handler are not caught here.
    pub fn execute(&self, task: &Task) -> TaskResult {
        match self.handlers.get(&task.operation) {
            Some(handler) => handler(&task.payload),
            None => Err(TaskError::unknown_operation(&task.operation)),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<_> = self.operations().collect();
        ops.sort_unstable();
        f.debug_struct("Registry").field("operations", &ops).finish()
    }
}

/// Decodes a handler payload into `T`.
pub fn args<T: DeserializeOwned>(payload: &Value) -> Result<T, TaskError> {
    T::deserialize(payload).map_err(|e| TaskError::invalid_payload(e.to_string()))
}

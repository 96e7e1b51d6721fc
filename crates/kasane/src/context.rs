//! Data supplied by the caller for one render.

use crate::error::{KasaneError, Result};
use crate::value::Value;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Read-only mapping from top-level variable names to values.
///
/// The renderer never mutates a context; loop bindings live in their own
/// scope stack, so one context can be shared by concurrent renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    root: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object
    pub fn from_json(data: JsonValue) -> Result<Self> {
        match Value::from_json(data) {
            Value::Object(root) => Ok(Self { root }),
            other => Err(KasaneError::InvalidContext {
                message: format!("root data must be an object, got {}", other.type_name()),
            }),
        }
    }

    /// Build a context from any serializable value that serializes to a map.
    pub fn from_serialize<T: Serialize + ?Sized>(data: &T) -> Result<Self> {
        Self::from_json(serde_json::to_value(data)?)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.root.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.root.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

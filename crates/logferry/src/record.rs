// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log record model.
//!
//! A [`LogRecord`] is an ordered set of uniquely named fields. Field order is
//! the order of first insertion; overwriting a field keeps its position. The
//! original event text lives in the distinguished `raw_event` field.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::constants::RAW_EVENT;

/// Value of a record field.
///
/// `Undefined` marks a field that exists but carries no value, which is
/// distinct from the field being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Boolean(bool),
    Integer(i64),
    String(String),
    DateTime(OffsetDateTime),
    Binary(Vec<u8>),
    IpAddr(IpAddr),
}

impl Value {
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<IpAddr> for Value {
    fn from(value: IpAddr) -> Self {
        Value::IpAddr(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Field {
    name: String,
    value: Value,
}

/// One log event.
///
/// Records are owned by whichever queue holds them; `clone` produces an
/// independent copy for fan-out to several routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    fields: Vec<Field>,
}

impl LogRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record whose `raw_event` is `raw`.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.set(RAW_EVENT, Value::String(raw.into()));
        record
    }

    #[must_use]
    pub fn raw_event(&self) -> Option<&str> {
        self.get(RAW_EVENT).and_then(Value::as_str)
    }

    pub fn set_raw_event(&mut self, raw: impl Into<String>) {
        self.set(RAW_EVENT, Value::String(raw.into()));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|field| field.name == name)
            .map(|field| &mut field.value)
    }

    /// Sets `name` to `value`, returning the previous value if the field
    /// existed. Existing fields keep their position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push(Field { name, value });
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let position = self.fields.iter().position(|field| field.name == name)?;
        Some(self.fields.remove(position).value)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|field| (field.name.as_str(), &field.value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_keeps_insertion_order_and_unique_keys() {
        let mut record = LogRecord::from_raw("hello");
        record.set("Severity", "INFO");
        record.set("Count", 1i64);
        let previous = record.set("Severity", "ERROR");

        assert_eq!(previous, Some(Value::from("INFO")));
        let names: Vec<&str> = record.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["raw_event", "Severity", "Count"]);
        assert_eq!(record.get("Severity"), Some(&Value::from("ERROR")));
    }

    #[test]
    fn test_undefined_is_distinct_from_absent() {
        let mut record = LogRecord::new();
        record.set("Hostname", Value::Undefined);

        assert!(record.contains("Hostname"));
        assert!(!record.get("Hostname").is_some_and(Value::is_defined));
        assert!(record.get("Missing").is_none());
    }

    #[test]
    fn test_clone_is_independent() {
        let original = LogRecord::from_raw("line");
        let mut copy = original.clone();
        copy.set_raw_event("changed");

        assert_eq!(original.raw_event(), Some("line"));
        assert_eq!(copy.raw_event(), Some("changed"));
    }

    #[test]
    fn test_remove_field() {
        let mut record = LogRecord::from_raw("line");
        record.set("a", 1i64);
        record.set("b", 2i64);

        assert_eq!(record.remove("a"), Some(Value::Integer(1)));
        assert_eq!(record.remove("a"), None);
        assert_eq!(record.len(), 2);
    }
}

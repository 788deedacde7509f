// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # AMQP Field Values and Argument Tables
//!
//! Caller-facing options accept argument tables as `serde_json::Value` so the
//! surface stays close to the loosely-typed configuration the adapter is fed.
//! This module validates those values and converts them into the typed
//! `FieldValue` representation the driver layer understands.

use crate::errors::AmqpError;
use serde_json::Value;
use std::collections::BTreeMap;

/// A typed AMQP field-table value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<FieldValue>),
    Table(FieldTable),
    Timestamp(u64),
    Void,
}

/// An AMQP field table keyed by field name.
pub type FieldTable = BTreeMap<String, FieldValue>;

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Void,
            Value::Bool(v) => FieldValue::Bool(*v),
            Value::Number(n) => match n.as_i64() {
                Some(v) => FieldValue::Int(v),
                None => FieldValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(v) => FieldValue::String(v.clone()),
            Value::Array(items) => FieldValue::Array(items.iter().map(FieldValue::from).collect()),
            Value::Object(map) => FieldValue::Table(
                map.iter()
                    .map(|(key, value)| (key.clone(), FieldValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

/// Converts a caller-supplied `arguments` option into a field table.
///
/// The value must be a JSON object; anything else fails with
/// [`AmqpError::InvalidArgument`] before any driver call is made.
pub fn arguments_from_json(value: &Value) -> Result<FieldTable, AmqpError> {
    let Value::Object(map) = value else {
        return Err(AmqpError::InvalidArgument(
            "the `arguments` option must be a mapping".to_owned(),
        ));
    };

    Ok(map
        .iter()
        .map(|(key, value)| (key.clone(), FieldValue::from(value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_object_arguments() {
        let table = arguments_from_json(&json!({
            "x-message-ttl": 30000,
            "x-ha-policy": "all",
            "enabled": true,
            "ratio": 0.5,
            "nothing": null,
        }))
        .unwrap();

        assert_eq!(table.get("x-message-ttl"), Some(&FieldValue::Int(30000)));
        assert_eq!(
            table.get("x-ha-policy"),
            Some(&FieldValue::String("all".to_owned()))
        );
        assert_eq!(table.get("enabled"), Some(&FieldValue::Bool(true)));
        assert_eq!(table.get("ratio"), Some(&FieldValue::Float(0.5)));
        assert_eq!(table.get("nothing"), Some(&FieldValue::Void));
    }

    #[test]
    fn converts_nested_values() {
        let table = arguments_from_json(&json!({
            "nested": {"count": 3},
            "list": ["a", "b"],
        }))
        .unwrap();

        let FieldValue::Table(nested) = table.get("nested").unwrap() else {
            panic!("expected a nested table");
        };
        assert_eq!(nested.get("count"), Some(&FieldValue::Int(3)));

        assert_eq!(
            table.get("list"),
            Some(&FieldValue::Array(vec![
                FieldValue::String("a".to_owned()),
                FieldValue::String("b".to_owned()),
            ]))
        );
    }

    #[test]
    fn rejects_non_object_arguments() {
        for value in [json!("not-a-map"), json!(42), json!(["a"]), json!(null)] {
            assert!(matches!(
                arguments_from_json(&value),
                Err(AmqpError::InvalidArgument(_))
            ));
        }
    }
}

// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Predicate language evaluated against scalar fields and table rows

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::error::{Result, VectorIndexError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// Single field condition
    Field {
        field: String,
        condition: FieldCondition,
    },

    /// Logical AND of multiple filters
    And(Vec<FilterExpr>),

    /// Logical OR of multiple filters
    Or(Vec<FilterExpr>),

    /// Logical NOT of a filter
    Not(Box<FilterExpr>),
}

/// Field-level conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCondition {
    Equals(Value),
    NotEquals(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    IsNull,
    IsNotNull,
    Range { min: Value, max: Value, inclusive: bool },
}

impl FilterExpr {
    pub fn field(field: impl Into<String>, condition: FieldCondition) -> Self {
        FilterExpr::Field {
            field: field.into(),
            condition,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, FieldCondition::Equals(value.into()))
    }

    /// Reject structurally empty expressions before any data is read
    pub fn validate(&self) -> Result<()> {
        match self {
            FilterExpr::Field { field, .. } if field.is_empty() => Err(VectorIndexError::InvalidArgument(
                "filter field name is empty".to_string(),
            )),
            FilterExpr::Field { .. } => Ok(()),
            FilterExpr::And(filters) | FilterExpr::Or(filters) => {
                if filters.is_empty() {
                    return Err(VectorIndexError::InvalidArgument(
                        "logical filter has no operands".to_string(),
                    ));
                }
                filters.iter().try_for_each(|f| f.validate())
            }
            FilterExpr::Not(inner) => inner.validate(),
        }
    }

    pub fn matches(&self, row: &BTreeMap<String, Value>) -> bool {
        match self {
            FilterExpr::Field { field, condition } => match row.get(field) {
                Some(value) => matches_condition(value, condition),
                None => matches!(condition, FieldCondition::IsNull),
            },
            FilterExpr::And(filters) => filters.iter().all(|f| f.matches(row)),
            FilterExpr::Or(filters) => filters.iter().any(|f| f.matches(row)),
            FilterExpr::Not(inner) => !inner.matches(row),
        }
    }
}

fn matches_condition(value: &Value, condition: &FieldCondition) -> bool {
    match condition {
        FieldCondition::Equals(target) => values_equal(value, target),
        FieldCondition::NotEquals(target) => !values_equal(value, target),
        FieldCondition::GreaterThan(target) => compare(value, target) == Some(Ordering::Greater),
        FieldCondition::GreaterThanOrEqual(target) => {
            matches!(compare(value, target), Some(Ordering::Greater | Ordering::Equal))
        }
        FieldCondition::LessThan(target) => compare(value, target) == Some(Ordering::Less),
        FieldCondition::LessThanOrEqual(target) => {
            matches!(compare(value, target), Some(Ordering::Less | Ordering::Equal))
        }
        FieldCondition::In(targets) => targets.iter().any(|t| values_equal(value, t)),
        FieldCondition::NotIn(targets) => !targets.iter().any(|t| values_equal(value, t)),
        FieldCondition::Contains(text) => match value {
            Value::String(s) => s.contains(text.as_str()),
            Value::Array(items) => items.iter().any(|item| item.as_str() == Some(text.as_str())),
            _ => false,
        },
        FieldCondition::StartsWith(prefix) => value.as_str().map_or(false, |s| s.starts_with(prefix.as_str())),
        FieldCondition::EndsWith(suffix) => value.as_str().map_or(false, |s| s.ends_with(suffix.as_str())),
        FieldCondition::IsNull => value.is_null(),
        FieldCondition::IsNotNull => !value.is_null(),
        FieldCondition::Range { min, max, inclusive } => {
            let lower = compare(value, min);
            let upper = compare(value, max);
            match (lower, upper) {
                (Some(lower), Some(upper)) if *inclusive => lower != Ordering::Less && upper != Ordering::Greater,
                (Some(lower), Some(upper)) => lower == Ordering::Greater && upper == Ordering::Less,
                _ => false,
            }
        }
    }
}

/// Numbers compare by value regardless of integer/float representation
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

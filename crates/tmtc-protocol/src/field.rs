//! Field mapping primitives.
//!
//! Small rules that produce or gate a single field value:
//!
//! - [`FixedField`]: a typed literal parsed once
//! - [`AutoIncrementField`]: a counter owned by its outbound mapping
//! - [`ComputedField`]: an expression over the current field map
//! - [`EventCondition`]: an equality gate on a decoded field

use crate::error::{FieldError, FieldResult};
use crate::expr::{CompiledExpression, ExpressionEvaluator};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tmtc_common::{format_value, FieldMap, Value, ValueType};

// ============================================================================
// Fixed Field
// ============================================================================

/// Configuration of a [`FixedField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixedFieldConfig {
    pub field: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
}

/// A field with a constant value.
#[derive(Debug, Clone)]
pub struct FixedField {
    field: String,
    value: Value,
}

impl FixedField {
    /// Parse the literal according to `value_type`.
    pub fn new(field: impl Into<String>, value_type: ValueType, literal: &str) -> FieldResult<Self> {
        Ok(FixedField {
            field: field.into(),
            value: value_type.parse(literal)?,
        })
    }

    pub fn from_config(config: &FixedFieldConfig) -> FieldResult<Self> {
        Self::new(config.field.clone(), config.value_type, &config.value)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

// ============================================================================
// Auto-Increment Field
// ============================================================================

fn default_counter_type() -> ValueType {
    ValueType::UnsignedInteger
}

/// Configuration of an [`AutoIncrementField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AutoIncrementConfig {
    pub field: String,
    #[serde(rename = "type", default = "default_counter_type")]
    pub output_type: ValueType,
    /// Format template for character-string output, e.g. `CMD{:04}`.
    #[serde(default)]
    pub format: Option<String>,
}

/// A field filled from a monotonic counter starting at zero.
///
/// Each field owns its counter; every command built from the same outbound
/// mapping shares it.
#[derive(Debug)]
pub struct AutoIncrementField {
    field: String,
    output_type: ValueType,
    format: Option<String>,
    counter: AtomicU64,
}

impl AutoIncrementField {
    pub fn new(
        field: impl Into<String>,
        output_type: ValueType,
        format: Option<String>,
    ) -> FieldResult<Self> {
        let field = field.into();
        match output_type {
            ValueType::Enumerated
            | ValueType::UnsignedInteger
            | ValueType::SignedInteger
            | ValueType::Real
            | ValueType::CharacterString => {}
            other => {
                return Err(FieldError::Evaluation {
                    field,
                    reason: format!("counter cannot produce {} values", other),
                })
            }
        }
        if let Some(template) = &format {
            format_value(template, &Value::Integer(0))?;
        }
        Ok(AutoIncrementField {
            field,
            output_type,
            format,
            counter: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &AutoIncrementConfig) -> FieldResult<Self> {
        Self::new(config.field.clone(), config.output_type, config.format.clone())
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Advance the counter and return the value it held.
    pub fn next(&self) -> FieldResult<Value> {
        let count = self.counter.fetch_add(1, Ordering::AcqRel);
        self.transform(count)
    }

    /// Current counter value, without advancing it.
    pub fn get(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn transform(&self, count: u64) -> FieldResult<Value> {
        match (&self.output_type, &self.format) {
            (ValueType::CharacterString, Some(template)) => {
                let count = i64::try_from(count).unwrap_or(i64::MAX);
                Ok(Value::String(format_value(template, &Value::Integer(count))?))
            }
            (value_type, _) => Ok(value_type.from_counter(count)),
        }
    }
}

// ============================================================================
// Computed Field
// ============================================================================

/// Configuration of a [`ComputedField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputedFieldConfig {
    pub field: String,
    pub expression: String,
}

/// A field whose value is an expression over the other fields.
#[derive(Debug)]
pub struct ComputedField {
    field: String,
    expression: String,
    compiled: Box<dyn CompiledExpression>,
}

impl ComputedField {
    /// Compile the expression with the given evaluator.
    pub fn new(
        field: impl Into<String>,
        expression: impl Into<String>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> FieldResult<Self> {
        let expression = expression.into();
        let compiled = evaluator.compile(&expression)?;
        Ok(ComputedField {
            field: field.into(),
            expression,
            compiled,
        })
    }

    pub fn from_config(
        config: &ComputedFieldConfig,
        evaluator: &dyn ExpressionEvaluator,
    ) -> FieldResult<Self> {
        Self::new(config.field.clone(), config.expression.clone(), evaluator)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate against the current fields.
    pub fn compute(&self, fields: &FieldMap) -> FieldResult<Value> {
        self.compiled
            .evaluate(fields)
            .map_err(|reason| FieldError::Evaluation {
                field: self.field.clone(),
                reason,
            })
    }
}

// ============================================================================
// Event Condition
// ============================================================================

/// Configuration of an [`EventCondition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConditionConfig {
    pub field: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
}

/// Gates an event on a decoded field equal to a literal.
#[derive(Debug, Clone)]
pub struct EventCondition {
    field: String,
    expected: Value,
}

impl EventCondition {
    pub fn new(field: impl Into<String>, value_type: ValueType, literal: &str) -> FieldResult<Self> {
        Ok(EventCondition {
            field: field.into(),
            expected: value_type.parse(literal)?,
        })
    }

    pub fn from_config(config: &EventConditionConfig) -> FieldResult<Self> {
        Self::new(config.field.clone(), config.value_type, &config.value)
    }

    /// A missing field never matches.
    pub fn matches(&self, fields: &FieldMap) -> bool {
        fields
            .get(&self.field)
            .map(|v| v.matches(&self.expected))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BuiltinEvaluator;
    use std::sync::Arc;

    #[test]
    fn test_fixed_field() {
        let f = FixedField::new("mode", ValueType::Enumerated, "3").unwrap();
        assert_eq!(f.value(), &Value::Integer(3));
        assert!(FixedField::new("mode", ValueType::Enumerated, "three").is_err());
    }

    #[test]
    fn test_auto_increment_from_zero() {
        let f = AutoIncrementField::new("seq", ValueType::UnsignedInteger, None).unwrap();
        assert_eq!(f.get(), 0);
        let values: Vec<Value> = (0..3).map(|_| f.next().unwrap()).collect();
        assert_eq!(values, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
        assert_eq!(f.get(), 3);
    }

    #[test]
    fn test_auto_increment_formats() {
        let f = AutoIncrementField::new("tag", ValueType::CharacterString, Some("CMD{:04}".into()))
            .unwrap();
        assert_eq!(f.next().unwrap(), Value::String("CMD0000".into()));
        assert_eq!(f.next().unwrap(), Value::String("CMD0001".into()));

        let real = AutoIncrementField::new("r", ValueType::Real, None).unwrap();
        assert_eq!(real.next().unwrap(), Value::Float(0.0));

        assert!(AutoIncrementField::new("b", ValueType::OctetString, None).is_err());
        assert!(AutoIncrementField::new("t", ValueType::CharacterString, Some("{oops".into()))
            .is_err());
    }

    #[test]
    fn test_auto_increment_concurrent() {
        let f = Arc::new(AutoIncrementField::new("seq", ValueType::UnsignedInteger, None).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    (0..100).map(|_| f.next().unwrap().as_i64().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..400).collect::<Vec<_>>());
    }

    #[test]
    fn test_computed_field() {
        let f = ComputedField::new("celsius", "raw / 10 - 40", &BuiltinEvaluator).unwrap();
        let mut fields = FieldMap::new();
        fields.insert("raw".into(), Value::Integer(650));
        assert_eq!(f.compute(&fields).unwrap(), Value::Integer(25));

        let err = f.compute(&FieldMap::new()).unwrap_err();
        assert!(matches!(err, FieldError::Evaluation { ref field, .. } if field == "celsius"));
        assert!(ComputedField::new("bad", "raw +", &BuiltinEvaluator).is_err());
    }

    #[test]
    fn test_event_condition() {
        let c = EventCondition::new("alarm", ValueType::SignedInteger, "1").unwrap();
        let mut fields = FieldMap::new();
        assert!(!c.matches(&fields));
        fields.insert("alarm".into(), Value::Integer(1));
        assert!(c.matches(&fields));
        fields.insert("alarm".into(), Value::Integer(0));
        assert!(!c.matches(&fields));
    }
}

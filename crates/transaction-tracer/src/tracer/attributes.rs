// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::TracerConfig;
use crate::error::TracerError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAttribute {
    pub value: AttributeValue,
    /// Also shown in lightweight span views.
    pub for_span: bool,
}

/// Size limits applied to custom attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeLimits {
    pub max_count: usize,
    pub max_key_bytes: usize,
    pub max_value_bytes: usize,
}

impl From<&TracerConfig> for AttributeLimits {
    fn from(config: &TracerConfig) -> Self {
        Self {
            max_count: config.max_custom_attributes,
            max_key_bytes: config.max_attribute_key_bytes,
            max_value_bytes: config.max_attribute_value_bytes,
        }
    }
}

/// Longest prefix of `value` that fits in `max_bytes` without splitting a character.
#[must_use]
pub fn truncate_to_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// The two attribute maps of a tracer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attributes {
    custom: BTreeMap<String, AttributeValue>,
    agent: BTreeMap<String, AgentAttribute>,
}

impl Attributes {
    /// Stores a user-supplied attribute. Replacing an existing key never counts against the
    /// limit.
    pub fn put_custom(
        &mut self,
        key: &str,
        value: AttributeValue,
        limits: &AttributeLimits,
    ) -> Result<(), TracerError> {
        if key.is_empty() {
            return Err(TracerError::AttributeRejected {
                key: key.to_string(),
                reason: "empty key".to_string(),
            });
        }
        if key.len() > limits.max_key_bytes {
            return Err(TracerError::AttributeRejected {
                key: truncate_to_char_boundary(key, limits.max_key_bytes).to_string(),
                reason: format!("key longer than {} bytes", limits.max_key_bytes),
            });
        }
        if !self.custom.contains_key(key) && self.custom.len() >= limits.max_count {
            return Err(TracerError::AttributeRejected {
                key: key.to_string(),
                reason: format!("more than {} custom attributes", limits.max_count),
            });
        }

        let value = match value {
            AttributeValue::String(s) if s.len() > limits.max_value_bytes => AttributeValue::String(
                truncate_to_char_boundary(&s, limits.max_value_bytes).to_string(),
            ),
            other => other,
        };
        self.custom.insert(key.to_string(), value);
        Ok(())
    }

    pub fn put_agent(&mut self, key: &str, value: AttributeValue, for_span: bool) {
        self.agent
            .insert(key.to_string(), AgentAttribute { value, for_span });
    }

    #[must_use]
    pub fn custom(&self) -> &BTreeMap<String, AttributeValue> {
        &self.custom
    }

    #[must_use]
    pub fn agent(&self) -> &BTreeMap<String, AgentAttribute> {
        &self.agent
    }

    /// Agent attributes flagged for span views.
    pub fn span_attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.agent
            .iter()
            .filter(|(_, attribute)| attribute.for_span)
            .map(|(key, attribute)| (key.as_str(), &attribute.value))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty() && self.agent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: AttributeLimits = AttributeLimits {
        max_count: 2,
        max_key_bytes: 8,
        max_value_bytes: 5,
    };

    #[test]
    fn test_custom_value_truncated_at_char_boundary() {
        let mut attributes = Attributes::default();
        attributes
            .put_custom("user", "héllo world".into(), &LIMITS)
            .unwrap();
        // "hé" is 3 bytes, "héll" is 5.
        assert_eq!(
            attributes.custom()["user"],
            AttributeValue::String("héll".to_string())
        );

        attributes.put_custom("emoji", "ab😀".into(), &LIMITS).unwrap();
        assert_eq!(
            attributes.custom()["emoji"],
            AttributeValue::String("ab".to_string())
        );
    }

    #[test]
    fn test_custom_key_and_count_limits() {
        let mut attributes = Attributes::default();
        assert!(matches!(
            attributes.put_custom("much_too_long", 1i64.into(), &LIMITS),
            Err(TracerError::AttributeRejected { .. })
        ));
        assert!(attributes.put_custom("", 1i64.into(), &LIMITS).is_err());

        attributes.put_custom("a", 1i64.into(), &LIMITS).unwrap();
        attributes.put_custom("b", true.into(), &LIMITS).unwrap();
        assert!(attributes.put_custom("c", 1.5.into(), &LIMITS).is_err());
        // Overwriting does not need a free slot.
        attributes.put_custom("a", 2i64.into(), &LIMITS).unwrap();
        assert_eq!(attributes.custom()["a"], AttributeValue::Int(2));
        assert_eq!(attributes.custom().len(), 2);
    }

    #[test]
    fn test_agent_attributes_are_not_limited() {
        let mut attributes = Attributes::default();
        for i in 0..10i64 {
            attributes.put_agent(&format!("agent.attribute.{i}"), i.into(), i % 2 == 0);
        }
        assert_eq!(attributes.agent().len(), 10);
        assert_eq!(attributes.span_attributes().count(), 5);
    }
}

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ModelError;

/// Identifies which model to instantiate and how.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelDescriptor {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Params,
}

impl ModelDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            params: Params::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Explicit name if one was given, otherwise the kind.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(u64),
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Construction parameters keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Integer parameter; strings are accepted in decimal or `0x` hex.
    pub fn u64(&self, key: &'static str) -> Result<Option<u64>, ModelError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ParamValue::Int(value)) => Ok(Some(*value)),
            Some(ParamValue::Text(text)) => parse_hex(text).map(Some).map_err(|e| {
                ModelError::InvalidParam {
                    param: key,
                    reason: format!("`{text}` is not a number: {e}"),
                }
            }),
            Some(ParamValue::Bool(_)) => Err(ModelError::InvalidParam {
                param: key,
                reason: "expected a number, got a boolean".into(),
            }),
        }
    }

    pub fn u64_or(&self, key: &'static str, default: u64) -> Result<u64, ModelError> {
        Ok(self.u64(key)?.unwrap_or(default))
    }

    pub fn require_u64(&self, key: &'static str) -> Result<u64, ModelError> {
        self.u64(key)?.ok_or(ModelError::MissingParam(key))
    }

    pub fn bool_or(&self, key: &'static str, default: bool) -> Result<bool, ModelError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(ParamValue::Bool(value)) => Ok(*value),
            Some(other) => Err(ModelError::InvalidParam {
                param: key,
                reason: format!("expected a boolean, got {other:?}"),
            }),
        }
    }

    pub fn text(&self, key: &'static str) -> Result<Option<&str>, ModelError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(text)) => Ok(Some(text)),
            Some(other) => Err(ModelError::InvalidParam {
                param: key,
                reason: format!("expected a string, got {other:?}"),
            }),
        }
    }
}

pub fn parse_hex(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(&hex.replace('_', ""), 16)
    } else {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_params_accept_hex_text() {
        let desc = ModelDescriptor::new("led_writer")
            .with_param("addr", "0x8000_0000")
            .with_param("delay", 12u64);

        assert_eq!(desc.params.u64("addr").unwrap(), Some(0x8000_0000));
        assert_eq!(desc.params.u64_or("delay", 1).unwrap(), 12);
        assert_eq!(desc.params.u64_or("missing", 7).unwrap(), 7);
    }

    #[test]
    fn wrong_param_type_is_rejected() {
        let desc = ModelDescriptor::new("finish_after").with_param("cycles", true);
        assert!(matches!(
            desc.params.require_u64("cycles"),
            Err(ModelError::InvalidParam { param: "cycles", .. })
        ));
        assert!(matches!(
            ModelDescriptor::new("finish_after").params.require_u64("cycles"),
            Err(ModelError::MissingParam("cycles"))
        ));
    }

    #[test]
    fn display_name_falls_back_to_kind() {
        assert_eq!(ModelDescriptor::new("uart_tx").display_name(), "uart_tx");
        assert_eq!(
            ModelDescriptor::new("uart_tx").named("tx0").display_name(),
            "tx0"
        );
    }
}

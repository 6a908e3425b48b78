use camino::Utf8Path;
use serde::Deserialize;

use crate::descriptor::ModelDescriptor;
use crate::error::ConfigError;

/// A co-simulation run as described in a YAML file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Models in stepping order.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    /// Optional safety net; a run is otherwise unbounded.
    #[serde(default)]
    pub max_rounds: Option<u64>,
}

impl RunConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == Some(0) {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".into()));
        }
        if let Some(empty) = self.models.iter().position(|m| m.kind.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("model #{empty} has an empty kind")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ParamValue;

    #[test]
    fn parses_models_in_order() {
        let config = RunConfig::from_yaml(
            r#"
max_rounds: 1000
models:
  - kind: led_writer
    params:
      addr: "0x80000000"
      delay: 16
  - kind: finish_after
    name: stop
    params: { cycles: 500 }
  - kind: uart_console
    params: { echo: false, until: 10 }
"#,
        )
        .unwrap();

        assert_eq!(config.max_rounds, Some(1000));
        let kinds: Vec<&str> = config.models.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, ["led_writer", "finish_after", "uart_console"]);
        assert_eq!(config.models[0].params.u64("addr").unwrap(), Some(0x8000_0000));
        assert_eq!(config.models[1].display_name(), "stop");
        assert!(!config.models[2].params.bool_or("echo", true).unwrap());

        let expected = ModelDescriptor::new("finish_after")
            .named("stop")
            .with_param("cycles", ParamValue::Int(500));
        assert_eq!(config.models[1], expected);
    }

    #[test]
    fn rejects_zero_round_limit() {
        let err = RunConfig::from_yaml("max_rounds: 0\nmodels: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = RunConfig::from_yaml("modles: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

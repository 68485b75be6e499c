use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A flat mapping from option name to value.
///
/// Layers resolve each option they consume through [`resolve`], layering an
/// explicit constructor argument over a supplied `Config` over the layer's
/// defaults. A `Config` can be built in code or loaded from a JSON object
/// file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    options: BTreeMap<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }
    /// Loads a config from a JSON file containing a single object.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(anyhow::Error::from)?;
        let value: Value = serde_json::from_str(&text).map_err(anyhow::Error::from)?;
        match value {
            Value::Object(map) => Ok(Self {
                options: map.into_iter().collect(),
            }),
            other => Err(Error::Graph(anyhow::anyhow!(
                "config file {:?} must contain a JSON object, found {}",
                path,
                other
            ))),
        }
    }
    /// Sets an option, consuming and returning the config.
    pub fn with(mut self, option: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(option.into(), value.into());
        self
    }
    /// Sets an option.
    pub fn set(&mut self, option: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(option.into(), value.into());
    }
    pub fn get(&self, option: &str) -> Option<&Value> {
        self.options.get(option)
    }
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Resolves a single option by precedence: explicit argument, then the
/// supplied config, then the defaults.
///
/// Pure; neither config is mutated, so it can be called once per option.
///
/// **Errors**
///
/// [`Error::MissingOption`] if no layer provides a value,
/// [`Error::InvalidOption`] if a value is present but does not deserialize
/// to the requested type.
pub fn resolve<T: DeserializeOwned>(
    option: &str,
    explicit: Option<T>,
    config: Option<&Config>,
    defaults: &Config,
) -> Result<T> {
    if let Some(value) = explicit {
        return Ok(value);
    }
    for layer in [config, Some(defaults)] {
        if let Some(value) = layer.and_then(|c| c.get(option)) {
            return serde_json::from_value(value.clone()).map_err(|e| Error::InvalidOption {
                option: option.into(),
                reason: e.to_string(),
            });
        }
    }
    Err(Error::MissingOption {
        option: option.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        Config::new().with("hidden_size", 1000).with("corruption_level", 0.4)
    }

    #[test]
    fn explicit_wins_over_config_and_defaults() {
        let config = Config::new().with("hidden_size", 512);
        let value: usize = resolve("hidden_size", Some(64), Some(&config), &defaults()).unwrap();
        assert_eq!(value, 64);
    }

    #[test]
    fn config_wins_over_defaults() {
        let config = Config::new().with("hidden_size", 512);
        let value: usize = resolve("hidden_size", None, Some(&config), &defaults()).unwrap();
        assert_eq!(value, 512);
    }

    #[test]
    fn defaults_used_last() {
        let value: f32 = resolve("corruption_level", None, None, &defaults()).unwrap();
        assert_eq!(value, 0.4);
    }

    #[test]
    fn missing_option_fails() {
        let err = resolve::<usize>("input_size", None, None, &defaults()).unwrap_err();
        assert!(matches!(err, Error::MissingOption { option } if option == "input_size"));
    }

    #[test]
    fn wrong_type_fails() {
        let config = Config::new().with("hidden_size", "lots");
        let err = resolve::<usize>("hidden_size", None, Some(&config), &defaults()).unwrap_err();
        assert!(matches!(err, Error::InvalidOption { option, .. } if option == "hidden_size"));
    }
}

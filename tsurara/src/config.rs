//! Runtime configuration.
//!
//! Each execution context is created with a [`RuntimeConfig`].
//! The lazily created thread-local context reads its configuration
//! from the environment:
//!
//! | Variable                    | Field                                      |
//! |-----------------------------|--------------------------------------------|
//! | `TSURARA_RELEASE_DEPTH`     | [`release_depth`][`RuntimeConfig::release_depth`]         |
//! | `TSURARA_DEFERRED_CAPACITY` | [`deferred_capacity`][`RuntimeConfig::deferred_capacity`] |
//! | `TSURARA_UNIQUE_START`      | [`unique_start`][`RuntimeConfig::unique_start`]           |

use {std::env, thiserror::Error};

/// Error returned when a configuration variable is malformed.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError
{
    /// The variable is set but could not be parsed.
    #[error("Invalid value {value:?} for {variable}")]
    InvalidValue
    {
        /// Name of the environment variable.
        variable: &'static str,

        /// The offending value.
        value: String,
    },
}

/// Parameters of an execution context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuntimeConfig
{
    /// Nesting depth of recursive frees before
    /// further frees are pushed on the deferred-free list.
    pub release_depth: usize,

    /// Initial capacity of the deferred-free list.
    pub deferred_capacity: usize,

    /// First value returned by [`Context::unique_id`][`crate::Context::unique_id`].
    pub unique_start: i64,
}

impl Default for RuntimeConfig
{
    fn default() -> Self
    {
        Self{release_depth: 64, deferred_capacity: 32, unique_start: 1}
    }
}

impl RuntimeConfig
{
    /// Start building a configuration from the defaults.
    pub fn builder() -> RuntimeConfigBuilder
    {
        RuntimeConfigBuilder::default()
    }

    /// Read the configuration from the environment.
    ///
    /// Malformed variables are logged and replaced by their defaults.
    pub fn from_env() -> Self
    {
        Self::from_lookup_lenient(|name| env::var(name).ok())
    }

    /// Read the configuration from the environment,
    /// failing on the first malformed variable.
    pub fn try_from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
        where F: FnMut(&'static str) -> Option<String>
    {
        let mut config = Self::default();
        for variable in VARIABLES {
            if let Some(value) = lookup(variable) {
                config.set(variable, value)?;
            }
        }
        Ok(config)
    }

    fn from_lookup_lenient<F>(mut lookup: F) -> Self
        where F: FnMut(&'static str) -> Option<String>
    {
        let mut config = Self::default();
        for variable in VARIABLES {
            if let Some(value) = lookup(variable) {
                if let Err(err) = config.set(variable, value) {
                    tracing::warn!("{err}; using the default");
                }
            }
        }
        config
    }

    fn set(&mut self, variable: &'static str, value: String)
        -> Result<(), ConfigError>
    {
        let invalid = || ConfigError::InvalidValue{variable, value: value.clone()};
        let trimmed = value.trim();
        match variable {
            RELEASE_DEPTH =>
                self.release_depth = trimmed.parse().map_err(|_| invalid())?,
            DEFERRED_CAPACITY =>
                self.deferred_capacity = trimmed.parse().map_err(|_| invalid())?,
            UNIQUE_START =>
                self.unique_start = trimmed.parse().map_err(|_| invalid())?,
            _ => unreachable!("Unknown variable {variable}"),
        }
        Ok(())
    }
}

const RELEASE_DEPTH: &str = "TSURARA_RELEASE_DEPTH";
const DEFERRED_CAPACITY: &str = "TSURARA_DEFERRED_CAPACITY";
const UNIQUE_START: &str = "TSURARA_UNIQUE_START";
const VARIABLES: [&str; 3] = [RELEASE_DEPTH, DEFERRED_CAPACITY, UNIQUE_START];

/// Builder for [`RuntimeConfig`].
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfigBuilder
{
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder
{
    /// Set [`RuntimeConfig::release_depth`].
    pub fn release_depth(mut self, depth: usize) -> Self
    {
        self.config.release_depth = depth;
        self
    }

    /// Set [`RuntimeConfig::deferred_capacity`].
    pub fn deferred_capacity(mut self, capacity: usize) -> Self
    {
        self.config.deferred_capacity = capacity;
        self
    }

    /// Set [`RuntimeConfig::unique_start`].
    pub fn unique_start(mut self, start: i64) -> Self
    {
        self.config.unique_start = start;
        self
    }

    /// Finish building.
    pub fn build(self) -> RuntimeConfig
    {
        self.config
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, std::collections::HashMap};

    fn lookup<'a>(vars: &'a HashMap<&'static str, &'static str>)
        -> impl FnMut(&'static str) -> Option<String> + 'a
    {
        move |name| vars.get(name).map(|value| value.to_string())
    }

    #[test]
    fn defaults()
    {
        let config = RuntimeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.release_depth, 64);
        assert_eq!(config.deferred_capacity, 32);
        assert_eq!(config.unique_start, 1);
    }

    #[test]
    fn overrides()
    {
        let vars = HashMap::from([
            ("TSURARA_RELEASE_DEPTH", "4"),
            ("TSURARA_UNIQUE_START", " -10 "),
        ]);
        let config = RuntimeConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.release_depth, 4);
        assert_eq!(config.deferred_capacity, 32);
        assert_eq!(config.unique_start, -10);
    }

    #[test]
    fn malformed()
    {
        let vars = HashMap::from([("TSURARA_DEFERRED_CAPACITY", "lots")]);
        let err = RuntimeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidValue{
            variable: "TSURARA_DEFERRED_CAPACITY",
            value: "lots".into(),
        });
        assert_eq!(
            err.to_string(),
            "Invalid value \"lots\" for TSURARA_DEFERRED_CAPACITY",
        );

        let config = RuntimeConfig::from_lookup_lenient(lookup(&vars));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn builder()
    {
        let config = RuntimeConfig::builder()
            .release_depth(0)
            .deferred_capacity(1)
            .unique_start(100)
            .build();
        assert_eq!(config.release_depth, 0);
        assert_eq!(config.deferred_capacity, 1);
        assert_eq!(config.unique_start, 100);
    }
}

//! Configuration types

use crate::{CachingMode, ConfigError, DeleteTiming};
use serde::{Deserialize, Serialize};

/// Environment variable holding the [`DeleteTiming`].
pub const ENV_DELETE_TIMING: &str = "ENTCACHE_DELETE_TIMING";
/// Environment variable holding the default [`CachingMode`].
pub const ENV_CACHING_MODE: &str = "ENTCACHE_CACHING_MODE";

/// Interceptor policy.
///
/// The default invalidates before and after every commit and reads and
/// writes the cache on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub delete_timing: DeleteTiming,
    /// Mode used when no per-call resolver is installed.
    pub default_mode: CachingMode,
}

impl MiddlewareConfig {
    /// Read the configuration from `ENTCACHE_*` environment variables.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DELETE_TIMING) {
            config.delete_timing = value.parse().map_err(|e: crate::PolicyParseError| {
                ConfigError::InvalidValue {
                    field: ENV_DELETE_TIMING.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(value) = lookup(ENV_CACHING_MODE) {
            config.default_mode = value.parse().map_err(|e: crate::PolicyParseError| {
                ConfigError::InvalidValue {
                    field: ENV_CACHING_MODE.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        Ok(config)
    }

    pub fn with_delete_timing(mut self, delete_timing: DeleteTiming) -> Self {
        self.delete_timing = delete_timing;
        self
    }

    pub fn with_default_mode(mut self, mode: CachingMode) -> Self {
        self.default_mode = mode;
        self
    }
}

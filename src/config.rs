// config.rs — Engine configuration.
//
// Everything a `FilterEngine` decides at construction time: how devices are
// chosen, which wgpu backends may be used, whether driver validation layers
// are on, whether a missing device degrades to the CPU references, and how
// much compiler output a `CompileFailed` may carry.
//
//   EngineConfig::default()            GPU on all platforms, primary
//                                      backends, no CPU fallback
//   EngineConfig::builder()...build()  same, with overrides, validated
//   EngineConfig::from_env()           default + KILN_* environment overlay
//
// ENVIRONMENT
// ───────────
//   KILN_DEVICE_CLASS   gpu | cpu | other | any
//   KILN_PLATFORMS      first | all
//   KILN_CPU_FALLBACK   0 | 1
//
// Unset variables keep the default. A set but unparseable value is an
// error, not silently ignored.

use thiserror::Error;

use crate::gpu::api::DeviceClass;
use crate::gpu::device::{PlatformSearch, SelectionPolicy};
use crate::gpu::program::MAX_BUILD_LOG_BYTES;

pub const ENV_DEVICE_CLASS: &str = "KILN_DEVICE_CLASS";
pub const ENV_PLATFORMS: &str = "KILN_PLATFORMS";
pub const ENV_CPU_FALLBACK: &str = "KILN_CPU_FALLBACK";

/// Smallest build-log cap accepted. Anything shorter cannot hold a useful
/// line of compiler output plus the truncation marker.
pub const MIN_BUILD_LOG_BYTES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid (expected {expected})")]
    InvalidEnv { var: &'static str, value: String, expected: &'static str },

    #[error("no wgpu backends enabled")]
    NoBackends,

    #[error("max_build_log_bytes must be at least {MIN_BUILD_LOG_BYTES} (got {0})")]
    BuildLogTooSmall(usize),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub selection: SelectionPolicy,
    pub backends: wgpu::Backends,
    /// Enable driver validation layers. Slow; on by default in debug builds.
    pub driver_validation: bool,
    /// Run the filter's CPU reference when no device matches the policy.
    pub cpu_fallback: bool,
    pub max_build_log_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            selection: SelectionPolicy::default(),
            backends: wgpu::Backends::PRIMARY,
            driver_validation: cfg!(debug_assertions),
            cpu_fallback: false,
            max_build_log_bytes: MAX_BUILD_LOG_BYTES,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if self.max_build_log_bytes < MIN_BUILD_LOG_BYTES {
            return Err(ConfigError::BuildLogTooSmall(self.max_build_log_bytes));
        }
        Ok(())
    }

    /// Defaults overlaid with the `KILN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();

        if let Some(value) = lookup(ENV_DEVICE_CLASS) {
            config.selection.class = parse_device_class(&value).ok_or(ConfigError::InvalidEnv {
                var: ENV_DEVICE_CLASS,
                value,
                expected: "gpu, cpu, other or any",
            })?;
        }
        if let Some(value) = lookup(ENV_PLATFORMS) {
            config.selection.platforms = match value.trim().to_ascii_lowercase().as_str() {
                "first" => PlatformSearch::FirstOnly,
                "all" => PlatformSearch::All,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_PLATFORMS,
                        value,
                        expected: "first or all",
                    })
                }
            };
        }
        if let Some(value) = lookup(ENV_CPU_FALLBACK) {
            config.cpu_fallback = match value.trim() {
                "1" => true,
                "0" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_CPU_FALLBACK,
                        value,
                        expected: "0 or 1",
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_device_class(s: &str) -> Option<DeviceClass> {
    match s.trim().to_ascii_lowercase().as_str() {
        "gpu" => Some(DeviceClass::Gpu),
        "cpu" => Some(DeviceClass::Cpu),
        "other" => Some(DeviceClass::Other),
        "any" => Some(DeviceClass::Any),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self { config: EngineConfig::default() }
    }

    pub fn selection(mut self, policy: SelectionPolicy) -> Self {
        self.config.selection = policy;
        self
    }

    pub fn device_class(mut self, class: DeviceClass) -> Self {
        self.config.selection.class = class;
        self
    }

    pub fn fallback_class(mut self, class: DeviceClass) -> Self {
        self.config.selection.fallback_class = Some(class);
        self
    }

    pub fn platforms(mut self, search: PlatformSearch) -> Self {
        self.config.selection.platforms = search;
        self
    }

    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.config.backends = backends;
        self
    }

    pub fn driver_validation(mut self, enable: bool) -> Self {
        self.config.driver_validation = enable;
        self
    }

    pub fn cpu_fallback(mut self, enable: bool) -> Self {
        self.config.cpu_fallback = enable;
        self
    }

    pub fn max_build_log_bytes(mut self, bytes: usize) -> Self {
        self.config.max_build_log_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        let c = EngineConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.selection, SelectionPolicy::default());
        assert!(!c.cpu_fallback);
    }

    #[test]
    fn test_builder_overrides() {
        let c = EngineConfig::builder()
            .device_class(DeviceClass::Any)
            .platforms(PlatformSearch::FirstOnly)
            .cpu_fallback(true)
            .backends(wgpu::Backends::VULKAN)
            .build()
            .unwrap();
        assert_eq!(c.selection.class, DeviceClass::Any);
        assert_eq!(c.selection.platforms, PlatformSearch::FirstOnly);
        assert!(c.cpu_fallback);
        assert_eq!(c.backends, wgpu::Backends::VULKAN);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        let err = EngineConfig::builder().backends(wgpu::Backends::empty()).build().unwrap_err();
        assert_eq!(err, ConfigError::NoBackends);

        let err = EngineConfig::builder().max_build_log_bytes(10).build().unwrap_err();
        assert_eq!(err, ConfigError::BuildLogTooSmall(10));
    }

    #[test]
    fn test_env_unset_keeps_defaults() {
        let c = EngineConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(c.selection, SelectionPolicy::default());
        assert!(!c.cpu_fallback);
    }

    #[test]
    fn test_env_overlay() {
        let c = EngineConfig::from_lookup(env(&[
            (ENV_DEVICE_CLASS, "CPU"),
            (ENV_PLATFORMS, "first"),
            (ENV_CPU_FALLBACK, "1"),
        ]))
        .unwrap();
        assert_eq!(c.selection.class, DeviceClass::Cpu);
        assert_eq!(c.selection.platforms, PlatformSearch::FirstOnly);
        assert!(c.cpu_fallback);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = EngineConfig::from_lookup(env(&[(ENV_DEVICE_CLASS, "tpu")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_DEVICE_CLASS, .. }));

        let err = EngineConfig::from_lookup(env(&[(ENV_CPU_FALLBACK, "yes")])).unwrap_err();
        assert!(err.to_string().contains("KILN_CPU_FALLBACK"));
    }
}

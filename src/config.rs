//! Override configuration
//!
//! The ratios are read once at startup from a YAML file expressed in
//! percentages:
//!
//! ```yaml
//! apiVersion: v1
//! kind: ClusterResourceOverrideConfig
//! spec:
//!   memoryRequestToLimitPercent: 50
//!   cpuRequestToLimitPercent: 25
//!   limitCPUToMemoryPercent: 200
//! ```
//!
//! A percentage of zero disables the corresponding rule.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// Expected `kind` of the configuration document
pub const CONFIG_KIND: &str = "ClusterResourceOverrideConfig";

/// The three independent override ratios
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideConfig {
    /// Memory request derived from the memory limit
    pub memory_request_to_limit_ratio: f64,
    /// CPU request derived from the CPU limit
    pub cpu_request_to_limit_ratio: f64,
    /// CPU limit derived from the memory limit (1.0 = 1 core per GiB)
    #[serde(rename = "limitCPUToMemoryRatio")]
    pub limit_cpu_to_memory_ratio: f64,
}

impl OverrideConfig {
    /// Returns true if no rule is enabled
    pub fn is_noop(&self) -> bool {
        self.memory_request_to_limit_ratio == 0.0
            && self.cpu_request_to_limit_ratio == 0.0
            && self.limit_cpu_to_memory_ratio == 0.0
    }

    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&content)?;

        info!(
            path = %path.display(),
            memory_request_to_limit_ratio = config.memory_request_to_limit_ratio,
            cpu_request_to_limit_ratio = config.cpu_request_to_limit_ratio,
            limit_cpu_to_memory_ratio = config.limit_cpu_to_memory_ratio,
            "Loaded override configuration"
        );
        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("invalid configuration: {e}")))?;

        if file.kind != CONFIG_KIND {
            return Err(Error::config(format!(
                "unexpected kind {:?}, expected {CONFIG_KIND:?}",
                file.kind
            )));
        }

        file.spec.validate()?;
        let config = file.spec.to_ratios();
        if config.is_noop() {
            warn!("All override percentages are zero; pods will never be mutated");
        }
        Ok(config)
    }
}

/// On-disk configuration document
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    kind: String,
    spec: OverrideSpec,
}

/// Percentages as written by cluster administrators
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideSpec {
    #[serde(default)]
    memory_request_to_limit_percent: i64,
    #[serde(default)]
    cpu_request_to_limit_percent: i64,
    #[serde(default, rename = "limitCPUToMemoryPercent")]
    limit_cpu_to_memory_percent: i64,
}

impl OverrideSpec {
    fn validate(&self) -> Result<()> {
        if !(0..=100).contains(&self.memory_request_to_limit_percent) {
            return Err(Error::config(format!(
                "memoryRequestToLimitPercent must be between 0 and 100, got {}",
                self.memory_request_to_limit_percent
            )));
        }
        if !(0..=100).contains(&self.cpu_request_to_limit_percent) {
            return Err(Error::config(format!(
                "cpuRequestToLimitPercent must be between 0 and 100, got {}",
                self.cpu_request_to_limit_percent
            )));
        }
        if self.limit_cpu_to_memory_percent < 0 {
            return Err(Error::config(format!(
                "limitCPUToMemoryPercent must not be negative, got {}",
                self.limit_cpu_to_memory_percent
            )));
        }
        Ok(())
    }

    fn to_ratios(&self) -> OverrideConfig {
        OverrideConfig {
            memory_request_to_limit_ratio: self.memory_request_to_limit_percent as f64 / 100.0,
            cpu_request_to_limit_ratio: self.cpu_request_to_limit_percent as f64 / 100.0,
            limit_cpu_to_memory_ratio: self.limit_cpu_to_memory_percent as f64 / 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
apiVersion: v1
kind: ClusterResourceOverrideConfig
spec:
  memoryRequestToLimitPercent: 50
  cpuRequestToLimitPercent: 25
  limitCPUToMemoryPercent: 200
"#;

    #[test]
    fn percentages_become_ratios() {
        let config = OverrideConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.memory_request_to_limit_ratio, 0.5);
        assert_eq!(config.cpu_request_to_limit_ratio, 0.25);
        assert_eq!(config.limit_cpu_to_memory_ratio, 2.0);
        assert!(!config.is_noop());
    }

    #[test]
    fn missing_percentages_disable_rules() {
        let config = OverrideConfig::from_yaml(
            "kind: ClusterResourceOverrideConfig\nspec:\n  cpuRequestToLimitPercent: 10\n",
        )
        .unwrap();
        assert_eq!(config.memory_request_to_limit_ratio, 0.0);
        assert_eq!(config.cpu_request_to_limit_ratio, 0.1);
        assert_eq!(config.limit_cpu_to_memory_ratio, 0.0);
    }

    #[test]
    fn all_zero_is_valid_noop() {
        let config =
            OverrideConfig::from_yaml("kind: ClusterResourceOverrideConfig\nspec: {}\n").unwrap();
        assert!(config.is_noop());
    }

    #[test]
    fn rejects_out_of_range_percentages() {
        let err = OverrideConfig::from_yaml(
            "kind: ClusterResourceOverrideConfig\nspec:\n  memoryRequestToLimitPercent: 101\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("memoryRequestToLimitPercent"));

        let err = OverrideConfig::from_yaml(
            "kind: ClusterResourceOverrideConfig\nspec:\n  cpuRequestToLimitPercent: -1\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cpuRequestToLimitPercent"));

        let err = OverrideConfig::from_yaml(
            "kind: ClusterResourceOverrideConfig\nspec:\n  limitCPUToMemoryPercent: -5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("limitCPUToMemoryPercent"));
    }

    #[test]
    fn rejects_wrong_kind() {
        let err = OverrideConfig::from_yaml("kind: Something\nspec: {}\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("unexpected kind"));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = OverrideConfig::from_yaml("kind: [unterminated").unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = OverrideConfig::load(file.path()).unwrap();
        assert_eq!(config.memory_request_to_limit_ratio, 0.5);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = OverrideConfig::load(Path::new("/nonexistent/override.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

//! Device configuration, read from `clvec/config.json` in xdg config directories

use crate::{backend::host::HostConfig, backend::opencl::OpenCLConfig, debug, partition::PartitionPolicy};
use nanoserde::DeJson;
use std::path::PathBuf;

/// Device configuration
#[derive(Debug, Default, DeJson)]
pub struct Config {
    /// Host backend configuration
    #[nserde(default)]
    pub host: HostConfig,
    /// `OpenCL` configuration
    #[nserde(default)]
    pub opencl: OpenCLConfig,
    /// Partitioning policy for new arrays, `"equal"` or `"vector_perf"`
    pub partitioning: Option<String>,
}

impl Config {
    /// Searches through config directories for `clvec/config.json`.
    /// If not found or failed to parse, returns defaults.
    #[must_use]
    pub fn load() -> Config {
        let debug_dev = debug().dev();
        xdg::BaseDirectories::new()
            .map_err(|e| {
                if debug_dev {
                    tracing::warn!("Failed to find config directories for config.json, {e}");
                }
            })
            .ok()
            .map(|bd| {
                let mut dirs = bd.get_config_dirs();
                dirs.push(bd.get_config_home());
                dirs
            })
            .and_then(|paths| {
                paths.into_iter().find_map(|mut path: PathBuf| {
                    path.push("clvec/config.json");
                    std::fs::read_to_string(&path).ok()
                })
            })
            .and_then(|file| Config::parse(&file))
            .inspect(|_| {
                if debug_dev {
                    tracing::info!("Device config successfully read and parsed.");
                }
            })
            .unwrap_or_else(|| {
                if debug_dev {
                    tracing::info!("Failed to get device config, using defaults.");
                }
                Config::default()
            })
    }

    /// Parses a config from json, `None` if the json is malformed.
    #[must_use]
    pub fn parse(json: &str) -> Option<Config> {
        Config::deserialize_json(json)
            .map_err(|e| {
                if debug().dev() {
                    tracing::warn!("Failed to parse config.json, {e}");
                }
            })
            .ok()
    }

    /// Configured partitioning policy, equal split unless set otherwise
    #[must_use]
    pub fn partition_policy(&self) -> PartitionPolicy {
        match self.partitioning.as_deref() {
            Some("vector_perf" | "perf") => PartitionPolicy::VectorPerf,
            _ => PartitionPolicy::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::{backend::DeviceKind, partition::PartitionPolicy};

    #[test]
    fn parse_full() {
        let config = Config::parse(
            r#"{
                "host": { "devices": 3, "kind": "gpu", "compute_units": 2, "max_workgroup_size": 64 },
                "opencl": { "platform_ids": [] },
                "partitioning": "vector_perf"
            }"#,
        )
        .unwrap();
        assert_eq!(config.host.device_count(), 3);
        assert_eq!(config.host.device_kind(), DeviceKind::Gpu);
        assert_eq!(config.host.compute_units(), 2);
        assert_eq!(config.host.max_workgroup_size(), 64);
        assert_eq!(config.opencl.platform_ids, Some(Vec::new()));
        assert_eq!(config.partition_policy(), PartitionPolicy::VectorPerf);
    }

    #[test]
    fn parse_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.host.device_count(), 1);
        assert_eq!(config.host.device_kind(), DeviceKind::Cpu);
        assert_eq!(config.opencl.platform_ids, None);
        assert_eq!(config.partition_policy(), PartitionPolicy::Equal);
        assert!(Config::parse("{ \"host\": 3 ").is_none());
    }
}

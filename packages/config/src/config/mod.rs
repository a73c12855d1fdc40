use std::path::Path;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod cluster;

pub use cluster::*;

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub cluster: Cluster,
}

impl Config {
	pub fn cluster(&self) -> &Cluster {
		&self.cluster
	}

	/// Reads a JSON5 config file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path)
			.with_context(|| format!("failed to read config file {}", path.display()))?;
		json5::from_str(&raw)
			.with_context(|| format!("failed to parse config file {}", path.display()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_config_uses_defaults() {
		let config: Config = json5::from_str("{}").unwrap();
		assert_eq!(config.cluster().allocator_sleep(), 3600);
		assert_eq!(config.cluster().container_memory_mb(), 1024);
		assert_eq!(config.cluster().container_cpu_cores(), 1);
		assert_eq!(config.cluster().preferred_host_retry_delay(), 5000);
		assert!(config.cluster().host_affinity());
		assert!(config.cluster().standby_enabled());
		assert_eq!(config.cluster().command_builder(), "shell");
	}

	#[test]
	fn overrides_parse() {
		let config: Config = json5::from_str(
			r#"{
				cluster: {
					allocator_sleep: 100,
					container_memory_mb: 4096,
					host_affinity: false,
					command_builder: "docker",
				},
			}"#,
		)
		.unwrap();
		assert_eq!(config.cluster().allocator_sleep(), 100);
		assert_eq!(config.cluster().container_memory_mb(), 4096);
		assert!(!config.cluster().host_affinity());
		assert_eq!(config.cluster().command_builder(), "docker");
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(json5::from_str::<Config>(r#"{ cluster: { sleep: 1 } }"#).is_err());
	}
}

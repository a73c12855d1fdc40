use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use understudy_util::duration;

/// Tuning for the container allocator and the standby failover coordinator.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Cluster {
	/// Interval between allocator control-loop passes.
	///
	/// Unit is in milliseconds.
	pub allocator_sleep: Option<u64>,
	/// Memory requested from the broker for each container.
	///
	/// Unit is in mebibytes.
	pub container_memory_mb: Option<u64>,
	/// CPU cores requested from the broker for each container.
	pub container_cpu_cores: Option<u32>,
	/// Delay applied to restart requests, and the window after which a ready
	/// preferred-host request that found no resource on its host is treated
	/// as expired.
	///
	/// Unit is in milliseconds.
	pub preferred_host_retry_delay: Option<u64>,
	/// Prefer placing a processor back on the host it last ran on.
	pub host_affinity: Option<bool>,
	/// Steal a warm standby's host when an active fails.
	pub standby_enabled: Option<bool>,
	/// Name of the registered command builder that materializes worker
	/// launch commands.
	pub command_builder: Option<String>,
}

impl Cluster {
	pub fn allocator_sleep(&self) -> u64 {
		self.allocator_sleep.unwrap_or(3600)
	}

	pub fn container_memory_mb(&self) -> u64 {
		self.container_memory_mb.unwrap_or(1024)
	}

	pub fn container_cpu_cores(&self) -> u32 {
		self.container_cpu_cores.unwrap_or(1)
	}

	pub fn preferred_host_retry_delay(&self) -> u64 {
		self.preferred_host_retry_delay
			.unwrap_or(duration::seconds(5) as u64)
	}

	pub fn host_affinity(&self) -> bool {
		self.host_affinity.unwrap_or(true)
	}

	pub fn standby_enabled(&self) -> bool {
		self.standby_enabled.unwrap_or(true)
	}

	pub fn command_builder(&self) -> &str {
		self.command_builder.as_deref().unwrap_or("shell")
	}
}

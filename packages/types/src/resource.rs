use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProcessorId;

/// Identifies one physical allocation ever handed back by the broker. Unique
/// across the lifetime of the job; a dead resource id is never reused.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Placeholder id used when a failure has to be keyed but the resource
	/// the processor last held is not known.
	pub fn unknown_for(processor_id: &ProcessorId) -> Self {
		Self(format!("unknown-{processor_id}"))
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ResourceId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostName(String);

impl HostName {
	pub fn new(host: impl Into<String>) -> Self {
		Self(host.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for HostName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for HostName {
	fn from(host: &str) -> Self {
		Self(host.to_string())
	}
}

/// Where a resource request wants to land.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferredHost {
	/// No preference; any host the broker offers will do.
	Any,
	Host(HostName),
}

impl PreferredHost {
	pub fn host(host: impl Into<String>) -> Self {
		Self::Host(HostName::new(host))
	}

	pub fn as_host(&self) -> Option<&HostName> {
		match self {
			Self::Any => None,
			Self::Host(host) => Some(host),
		}
	}

	pub fn matches(&self, host: &HostName) -> bool {
		match self {
			Self::Any => true,
			Self::Host(preferred) => preferred == host,
		}
	}
}

impl fmt::Display for PreferredHost {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Any => f.write_str("any-host"),
			Self::Host(host) => f.write_str(host.as_str()),
		}
	}
}

/// One container-sized allocation the broker handed back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
	pub id: ResourceId,
	pub host: HostName,
	pub cpu_cores: u32,
	pub memory_mb: u64,
}

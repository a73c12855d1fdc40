use thiserror::Error;
use understudy_types::{HostName, ProcessorId, ResourceId};

/// Fatal placement faults. Transient broker failures stay as plain `anyhow`
/// errors and are retried on the next allocator pass; these indicate a
/// programming error or a corrupted cluster view and must abort the process.
#[derive(Debug, Error)]
pub enum PlacementError {
	/// A matched resource does not live on the host its request asked for.
	#[error("resource {resource} lives on {actual}, request wanted {expected}")]
	HostMismatch {
		resource: ResourceId,
		actual: HostName,
		expected: HostName,
	},

	/// More than one member of a replication group was found on one host.
	#[error("{count} replication-group members of {processor} are running on host {host}")]
	ColocatedReplicas {
		processor: ProcessorId,
		host: HostName,
		count: usize,
	},
}

use serde::{Deserialize, Serialize};

/// Exit status the broker reports for a stopped container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
	Success,
	/// The container's disks failed underneath it.
	DiskFail,
	/// The cluster aborted the container, typically because its node died.
	Aborted,
	/// The scheduler reclaimed the container's resources.
	Preempted,
	Other(i32),
}

impl ExitStatus {
	/// True for the statuses that signal node-level failure and warrant an
	/// immediate standby-aware failover rather than a same-host retry.
	pub fn indicates_node_failure(self) -> bool {
		matches!(self, Self::DiskFail | Self::Aborted | Self::Preempted)
	}
}

use std::sync::atomic::{AtomicU64, Ordering};

use understudy_types::{HostName, ProcessorId, Resource};

/// Shared observable cluster view, mutated by both the allocator and the
/// failover coordinator.
///
/// The maps are individually consistent; callers must not assume a global
/// snapshot across them. A processor lives in at most one of `pending` /
/// `running` at any instant.
pub struct ClusterState {
	/// Launched on a resource, waiting for the broker to confirm running.
	pub pending: scc::HashMap<ProcessorId, Resource>,
	/// Confirmed running.
	pub running: scc::HashMap<ProcessorId, Resource>,

	pub preferred_host_requests: AtomicU64,
	pub any_host_requests: AtomicU64,
	pub matched_preferred_host_requests: AtomicU64,
	pub matched_any_host_requests: AtomicU64,
	pub expired_requests: AtomicU64,
	pub launched_processors: AtomicU64,
	pub failovers_to_standby: AtomicU64,
	pub failovers_to_any_host: AtomicU64,
	pub failed_standby_allocations: AtomicU64,
	pub released_extra_resources: AtomicU64,
}

impl ClusterState {
	pub fn new() -> Self {
		Self {
			pending: scc::HashMap::new(),
			running: scc::HashMap::new(),
			preferred_host_requests: AtomicU64::new(0),
			any_host_requests: AtomicU64::new(0),
			matched_preferred_host_requests: AtomicU64::new(0),
			matched_any_host_requests: AtomicU64::new(0),
			expired_requests: AtomicU64::new(0),
			launched_processors: AtomicU64::new(0),
			failovers_to_standby: AtomicU64::new(0),
			failovers_to_any_host: AtomicU64::new(0),
			failed_standby_allocations: AtomicU64::new(0),
			released_extra_resources: AtomicU64::new(0),
		}
	}

	pub fn running_resource(&self, id: &ProcessorId) -> Option<Resource> {
		self.running.read(id, |_, resource| resource.clone())
	}

	pub fn is_pending_or_running_on(&self, id: &ProcessorId, host: &HostName) -> bool {
		self.pending
			.read(id, |_, resource| resource.host == *host)
			.unwrap_or(false)
			|| self
				.running
				.read(id, |_, resource| resource.host == *host)
				.unwrap_or(false)
	}

	/// Moves a launched processor to running once the broker confirms it.
	/// Returns the resource it runs on, or `None` if it was never pending.
	pub fn mark_running(&self, id: &ProcessorId) -> Option<Resource> {
		let (_, resource) = self.pending.remove(id)?;
		let _ = self.running.upsert(id.clone(), resource.clone());
		Some(resource)
	}

	/// Forgets a processor entirely, e.g. when its container stopped.
	pub fn forget(&self, id: &ProcessorId) -> Option<Resource> {
		let pending = self.pending.remove(id).map(|(_, resource)| resource);
		let running = self.running.remove(id).map(|(_, resource)| resource);
		pending.or(running)
	}

	pub fn failovers_to_standby(&self) -> u64 {
		self.failovers_to_standby.load(Ordering::Relaxed)
	}

	pub fn failovers_to_any_host(&self) -> u64 {
		self.failovers_to_any_host.load(Ordering::Relaxed)
	}

	pub fn failed_standby_allocations(&self) -> u64 {
		self.failed_standby_allocations.load(Ordering::Relaxed)
	}
}

impl Default for ClusterState {
	fn default() -> Self {
		Self::new()
	}
}

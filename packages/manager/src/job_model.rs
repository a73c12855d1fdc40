use std::collections::HashMap;

use parking_lot::RwLock;
use understudy_types::{HostName, ProcessorId};

/// Read side of the embedded job-model store: the static processor set, each
/// processor's last-known host, and the coordinator url handed to workers.
pub trait JobModelStore: Send + Sync {
	fn processor_ids(&self) -> Vec<ProcessorId>;

	/// Last host the processor is known to have run on. `None` when the
	/// store has never seen it placed.
	fn last_known_host(&self, id: &ProcessorId) -> Option<HostName>;

	fn server_url(&self) -> String;
}

/// In-memory job model for tests and single-process deployments.
pub struct StaticJobModel {
	processors: Vec<ProcessorId>,
	hosts: RwLock<HashMap<ProcessorId, HostName>>,
	server_url: String,
}

impl StaticJobModel {
	pub fn new(
		processors: impl IntoIterator<Item = ProcessorId>,
		server_url: impl Into<String>,
	) -> Self {
		Self {
			processors: processors.into_iter().collect(),
			hosts: RwLock::new(HashMap::new()),
			server_url: server_url.into(),
		}
	}

	pub fn record_host(&self, id: ProcessorId, host: HostName) {
		self.hosts.write().insert(id, host);
	}
}

impl JobModelStore for StaticJobModel {
	fn processor_ids(&self) -> Vec<ProcessorId> {
		self.processors.clone()
	}

	fn last_known_host(&self, id: &ProcessorId) -> Option<HostName> {
		self.hosts.read().get(id).cloned()
	}

	fn server_url(&self) -> String {
		self.server_url.clone()
	}
}

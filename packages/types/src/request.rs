use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PreferredHost, ProcessorId};

/// Stable identity of one constructed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for RequestId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// An outstanding ask for one container-sized resource.
///
/// `requested_at` may lie in the future; the request only becomes eligible
/// for matching once the clock reaches it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceRequest {
	pub id: RequestId,
	pub processor_id: ProcessorId,
	pub preferred_host: PreferredHost,
	pub cpu_cores: u32,
	pub memory_mb: u64,
	/// Epoch milliseconds.
	pub requested_at: i64,
}

impl ResourceRequest {
	pub fn new(
		processor_id: ProcessorId,
		preferred_host: PreferredHost,
		cpu_cores: u32,
		memory_mb: u64,
		requested_at: i64,
	) -> Self {
		Self {
			id: RequestId::new(),
			processor_id,
			preferred_host,
			cpu_cores,
			memory_mb,
			requested_at,
		}
	}

	pub fn is_ready(&self, now: i64) -> bool {
		now >= self.requested_at
	}

	/// Milliseconds the request has been eligible. Negative while delayed.
	pub fn age(&self, now: i64) -> i64 {
		now - self.requested_at
	}
}

// Identity equality: two structurally identical requests are distinct asks.
impl PartialEq for ResourceRequest {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ResourceRequest {}

impl Hash for ResourceRequest {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use understudy_types::{
	HostName, PreferredHost, RequestId, Resource, ResourceId, ResourceRequest,
};

use crate::broker::ClusterBroker;
use crate::state::ClusterState;

/// Queue position of a pending request: earliest `requested_at` first, ties
/// broken by insertion order.
#[derive(PartialEq, Eq)]
struct QueueSlot {
	requested_at: i64,
	seq: u64,
	id: RequestId,
}

impl Ord for QueueSlot {
	fn cmp(&self, other: &Self) -> CmpOrdering {
		// Reversed so the BinaryHeap behaves as a min-heap.
		(other.requested_at, other.seq).cmp(&(self.requested_at, self.seq))
	}
}

impl PartialOrd for QueueSlot {
	fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
		Some(self.cmp(other))
	}
}

#[derive(Default)]
struct Inner {
	queue: BinaryHeap<QueueSlot>,
	requests: HashMap<RequestId, ResourceRequest>,
	/// Allocations handed back by the broker. Each resource is indexed under
	/// its concrete host and under `PreferredHost::Any`, so both host-bound
	/// and any-host requests can find it.
	allocated: HashMap<PreferredHost, VecDeque<Resource>>,
	seq: u64,
}

impl Inner {
	fn remove_allocated(&mut self, resource_id: &ResourceId) {
		for queue in self.allocated.values_mut() {
			queue.retain(|resource| resource.id != *resource_id);
		}
		self.allocated.retain(|_, queue| !queue.is_empty());
	}
}

/// Registry of outstanding resource requests and broker-allocated resources.
///
/// Every structural mutation happens under one internal lock. Broker calls
/// are made after the lock is released; a callback arriving concurrently sees
/// either the state before or after the mutation, never a torn one.
pub struct RequestState {
	inner: Mutex<Inner>,
	broker: Arc<dyn ClusterBroker>,
}

impl RequestState {
	pub fn new(broker: Arc<dyn ClusterBroker>) -> Self {
		Self {
			inner: Mutex::new(Inner::default()),
			broker,
		}
	}

	/// Enqueues the request and forwards it to the broker.
	#[tracing::instrument(skip_all, fields(request_id = %request.id, processor_id = %request.processor_id, preferred_host = %request.preferred_host))]
	pub async fn add_request(&self, request: ResourceRequest) -> Result<()> {
		{
			let mut inner = self.inner.lock();
			let seq = inner.seq;
			inner.seq += 1;
			inner.queue.push(QueueSlot {
				requested_at: request.requested_at,
				seq,
				id: request.id,
			});
			inner.requests.insert(request.id, request.clone());
		}

		tracing::debug!("requesting resource from broker");
		self.broker.request_resource(&request).await
	}

	/// Records an allocation the broker handed back.
	pub fn add_resource(&self, resource: Resource) {
		tracing::debug!(resource_id = %resource.id, host = %resource.host, "recording allocated resource");
		let mut inner = self.inner.lock();
		inner
			.allocated
			.entry(PreferredHost::Host(resource.host.clone()))
			.or_default()
			.push_back(resource.clone());
		inner
			.allocated
			.entry(PreferredHost::Any)
			.or_default()
			.push_back(resource);
	}

	/// The earliest request whose timestamp has been reached, without
	/// removing it.
	pub fn peek_ready_request(&self, now: i64) -> Option<ResourceRequest> {
		let mut inner = self.inner.lock();
		loop {
			let (id, requested_at) = {
				let slot = inner.queue.peek()?;
				(slot.id, slot.requested_at)
			};
			// Slots for consumed or cancelled requests are dropped lazily.
			if !inner.requests.contains_key(&id) {
				inner.queue.pop();
				continue;
			}
			if requested_at <= now {
				return inner.requests.get(&id).cloned();
			}
			return None;
		}
	}

	/// The first allocation usable for the preference, without removing it.
	pub fn peek_resource(&self, preferred_host: &PreferredHost) -> Option<Resource> {
		let inner = self.inner.lock();
		inner
			.allocated
			.get(preferred_host)
			.and_then(|queue| queue.front())
			.cloned()
	}

	/// Atomically consumes a matched request/resource pair and bumps the
	/// request-satisfied counter for the preference kind.
	pub fn update_state_after_assignment(
		&self,
		state: &ClusterState,
		request: &ResourceRequest,
		preferred_host: &PreferredHost,
		resource: &Resource,
	) {
		let mut inner = self.inner.lock();
		inner.requests.remove(&request.id);
		inner.remove_allocated(&resource.id);

		match preferred_host {
			PreferredHost::Any => state
				.matched_any_host_requests
				.fetch_add(1, Ordering::Relaxed),
			PreferredHost::Host(_) => state
				.matched_preferred_host_requests
				.fetch_add(1, Ordering::Relaxed),
		};
	}

	/// Hands the resource back to the broker and drops it from the index.
	pub async fn release_resource(&self, resource: &Resource) -> Result<()> {
		{
			let mut inner = self.inner.lock();
			inner.remove_allocated(&resource.id);
		}
		tracing::info!(resource_id = %resource.id, host = %resource.host, "releasing resource");
		self.broker.release_resource(resource).await
	}

	/// Like `release_resource`, for a resource a matched processor could not
	/// start on. Logged separately because it signals a rejected placement
	/// rather than surplus capacity.
	pub async fn release_unstartable_container(
		&self,
		resource: &Resource,
		preferred_host: &PreferredHost,
	) -> Result<()> {
		{
			let mut inner = self.inner.lock();
			inner.remove_allocated(&resource.id);
		}
		tracing::warn!(
			resource_id = %resource.id,
			host = %resource.host,
			preferred_host = %preferred_host,
			"releasing resource the matched processor cannot start on"
		);
		self.broker.release_resource(resource).await
	}

	/// Withdraws a request from the registry and the broker.
	pub async fn cancel_request(&self, request: &ResourceRequest) -> Result<()> {
		let removed = { self.inner.lock().requests.remove(&request.id) };
		if removed.is_none() {
			tracing::debug!(request_id = %request.id, "cancel for a request no longer outstanding");
			return Ok(());
		}
		tracing::info!(request_id = %request.id, processor_id = %request.processor_id, "cancelling resource request");
		self.broker.cancel_resource_request(request).await
	}

	/// Releases allocations no outstanding request can use: resources on
	/// hosts nothing prefers (beyond what any-host requests still need) and
	/// per-host surplus beyond the requests preferring that host.
	pub async fn release_extra_resources(&self, state: &ClusterState) -> Result<()> {
		let to_release: Vec<Resource> = {
			let mut inner = self.inner.lock();

			let mut per_host_need: HashMap<HostName, usize> = HashMap::new();
			let mut any_need = 0usize;
			for request in inner.requests.values() {
				match &request.preferred_host {
					PreferredHost::Any => any_need += 1,
					PreferredHost::Host(host) => {
						*per_host_need.entry(host.clone()).or_default() += 1
					}
				}
			}

			let mut extra = Vec::new();
			let allocation_order: Vec<Resource> = inner
				.allocated
				.get(&PreferredHost::Any)
				.map(|queue| queue.iter().cloned().collect())
				.unwrap_or_default();
			for resource in allocation_order {
				if let Some(need) = per_host_need.get_mut(&resource.host) {
					if *need > 0 {
						*need -= 1;
						continue;
					}
				}
				if any_need > 0 {
					any_need -= 1;
					continue;
				}
				extra.push(resource);
			}

			for resource in &extra {
				inner.remove_allocated(&resource.id);
			}
			extra
		};

		for resource in to_release {
			tracing::info!(resource_id = %resource.id, host = %resource.host, "releasing surplus resource");
			state.released_extra_resources.fetch_add(1, Ordering::Relaxed);
			if let Err(err) = self.broker.release_resource(&resource).await {
				tracing::warn!(?err, resource_id = %resource.id, "failed to release surplus resource");
			}
		}
		Ok(())
	}

	pub fn request_count(&self) -> usize {
		self.inner.lock().requests.len()
	}

	pub fn resource_count(&self) -> usize {
		self.inner
			.lock()
			.allocated
			.get(&PreferredHost::Any)
			.map(|queue| queue.len())
			.unwrap_or(0)
	}

	pub fn contains_request(&self, id: &RequestId) -> bool {
		self.inner.lock().requests.contains_key(id)
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;
	use understudy_types::ProcessorId;

	struct NullBroker;

	#[async_trait]
	impl ClusterBroker for NullBroker {
		async fn request_resource(&self, _: &ResourceRequest) -> Result<()> {
			Ok(())
		}
		async fn cancel_resource_request(&self, _: &ResourceRequest) -> Result<()> {
			Ok(())
		}
		async fn release_resource(&self, _: &Resource) -> Result<()> {
			Ok(())
		}
		async fn launch_processor(
			&self,
			_: &Resource,
			_: crate::command::CommandSpec,
		) -> Result<()> {
			Ok(())
		}
		async fn stop_processor(&self, _: &Resource) -> Result<()> {
			Ok(())
		}
	}

	fn request_state() -> RequestState {
		RequestState::new(Arc::new(NullBroker))
	}

	fn request(processor: &str, preferred: PreferredHost, requested_at: i64) -> ResourceRequest {
		ResourceRequest::new(ProcessorId::from(processor), preferred, 1, 1024, requested_at)
	}

	fn resource(id: &str, host: &str) -> Resource {
		Resource {
			id: ResourceId::from(id),
			host: HostName::from(host),
			cpu_cores: 1,
			memory_mb: 1024,
		}
	}

	#[tokio::test]
	async fn requests_surface_in_timestamp_order() {
		let requests = request_state();
		let late = request("1", PreferredHost::Any, 200);
		let early = request("0", PreferredHost::Any, 100);
		requests.add_request(late.clone()).await.unwrap();
		requests.add_request(early.clone()).await.unwrap();

		assert_eq!(requests.peek_ready_request(300).unwrap().id, early.id);
	}

	#[tokio::test]
	async fn ties_break_by_insertion_order() {
		let requests = request_state();
		let first = request("0", PreferredHost::Any, 100);
		let second = request("1", PreferredHost::Any, 100);
		requests.add_request(first.clone()).await.unwrap();
		requests.add_request(second.clone()).await.unwrap();

		assert_eq!(requests.peek_ready_request(100).unwrap().id, first.id);
	}

	#[tokio::test]
	async fn delayed_requests_stay_invisible_until_ready() {
		let requests = request_state();
		let delayed = request("0", PreferredHost::Any, 500);
		requests.add_request(delayed.clone()).await.unwrap();

		assert!(requests.peek_ready_request(499).is_none());
		assert_eq!(requests.peek_ready_request(500).unwrap().id, delayed.id);
	}

	#[tokio::test]
	async fn resources_are_indexed_under_host_and_any() {
		let requests = request_state();
		requests.add_resource(resource("r0", "h1"));

		assert!(requests
			.peek_resource(&PreferredHost::host("h1"))
			.is_some());
		assert!(requests.peek_resource(&PreferredHost::Any).is_some());
		assert!(requests
			.peek_resource(&PreferredHost::host("h2"))
			.is_none());
	}

	#[tokio::test]
	async fn assignment_consumes_request_and_resource_everywhere() {
		let state = ClusterState::new();
		let requests = request_state();
		let req = request("0", PreferredHost::host("h1"), 0);
		requests.add_request(req.clone()).await.unwrap();
		requests.add_resource(resource("r0", "h1"));

		let res = requests.peek_resource(&req.preferred_host).unwrap();
		requests.update_state_after_assignment(&state, &req, &req.preferred_host, &res);

		assert!(requests.peek_ready_request(10).is_none());
		assert!(requests.peek_resource(&PreferredHost::host("h1")).is_none());
		assert!(requests.peek_resource(&PreferredHost::Any).is_none());
		assert_eq!(
			state
				.matched_preferred_host_requests
				.load(Ordering::Relaxed),
			1
		);
	}

	#[tokio::test]
	async fn cancelled_requests_never_surface() {
		let requests = request_state();
		let req = request("0", PreferredHost::Any, 0);
		requests.add_request(req.clone()).await.unwrap();
		requests.cancel_request(&req).await.unwrap();

		assert!(requests.peek_ready_request(10).is_none());
		assert_eq!(requests.request_count(), 0);
	}

	#[tokio::test]
	async fn extra_release_keeps_what_outstanding_requests_need() {
		let state = ClusterState::new();
		let requests = request_state();

		// One request pinned to h1, one any-host request.
		requests
			.add_request(request("0", PreferredHost::host("h1"), 0))
			.await
			.unwrap();
		requests
			.add_request(request("1", PreferredHost::Any, 0))
			.await
			.unwrap();

		// h1 is wanted, h2 serves the any-host ask, h3 and the second h2
		// resource are surplus.
		requests.add_resource(resource("r0", "h1"));
		requests.add_resource(resource("r1", "h2"));
		requests.add_resource(resource("r2", "h2"));
		requests.add_resource(resource("r3", "h3"));

		requests.release_extra_resources(&state).await.unwrap();

		assert_eq!(requests.resource_count(), 2);
		assert!(requests.peek_resource(&PreferredHost::host("h1")).is_some());
		assert_eq!(state.released_extra_resources.load(Ordering::Relaxed), 2);
	}

	#[tokio::test]
	async fn release_extra_is_a_noop_when_everything_is_needed() {
		let state = ClusterState::new();
		let requests = request_state();
		requests
			.add_request(request("0", PreferredHost::Any, 0))
			.await
			.unwrap();
		requests.add_resource(resource("r0", "h5"));

		requests.release_extra_resources(&state).await.unwrap();
		assert_eq!(requests.resource_count(), 1);
	}
}

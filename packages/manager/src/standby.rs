use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use understudy_types::{
	ExitStatus, HostName, PreferredHost, ProcessorId, RequestId, Resource, ResourceId,
	ResourceRequest,
};

use crate::allocator::ContainerAllocator;
use crate::broker::ClusterBroker;
use crate::constraints::PlacementConstraints;
use crate::errors::PlacementError;
use crate::job_model::JobModelStore;
use crate::state::ClusterState;

/// Book-keeping for one failover attempt, keyed by the resource id the
/// active held when it failed. A resource id is never reused, so the key
/// identifies the failure incarnation unambiguously.
pub struct FailoverMetadata {
	active_processor_id: ProcessorId,
	active_resource_id: ResourceId,
	book: Mutex<FailoverBook>,
}

#[derive(Default)]
struct FailoverBook {
	/// Standby resource instances stopped (or targeted) in this attempt and
	/// the host each one vacated. Append-only for the life of the failover.
	selected_standbys: HashMap<ResourceId, HostName>,
	/// Requests issued while driving this failover, by identity.
	requests: HashMap<RequestId, ResourceRequest>,
}

impl FailoverMetadata {
	fn new(active_processor_id: ProcessorId, active_resource_id: ResourceId) -> Self {
		Self {
			active_processor_id,
			active_resource_id,
			book: Mutex::new(FailoverBook::default()),
		}
	}

	pub fn active_processor_id(&self) -> &ProcessorId {
		&self.active_processor_id
	}

	pub fn active_resource_id(&self) -> &ResourceId {
		&self.active_resource_id
	}

	pub fn record_selected_standby(&self, resource_id: ResourceId, host: HostName) {
		self.book.lock().selected_standbys.insert(resource_id, host);
	}

	pub fn record_request(&self, request: &ResourceRequest) {
		self.book.lock().requests.insert(request.id, request.clone());
	}

	pub fn uses_standby_resource(&self, resource_id: &ResourceId) -> bool {
		self.book.lock().selected_standbys.contains_key(resource_id)
	}

	/// True when the host was vacated by a selected standby or is the
	/// preferred host of a request already issued in this failover. Both
	/// sets are read under one lock so the pair is consistent.
	pub fn uses_standby_host(&self, host: &HostName) -> bool {
		let book = self.book.lock();
		book.selected_standbys.values().any(|used| used == host)
			|| book.requests.values().any(
				|request| matches!(&request.preferred_host, PreferredHost::Host(h) if h == host),
			)
	}

	pub fn owns_request(&self, id: &RequestId) -> bool {
		self.book.lock().requests.contains_key(id)
	}

	/// Host the given standby resource vacated, if it was selected here.
	pub fn standby_host(&self, resource_id: &ResourceId) -> Option<HostName> {
		self.book.lock().selected_standbys.get(resource_id).cloned()
	}

	pub fn selected_standbys(&self) -> HashMap<ResourceId, HostName> {
		self.book.lock().selected_standbys.clone()
	}

	pub fn recorded_requests(&self) -> Vec<ResourceRequest> {
		self.book.lock().requests.values().cloned().collect()
	}
}

/// Decides, on every container stop, launch failure, request expiry and
/// constraint violation, whether to initiate a failover, which standby host
/// to steal, and how to sequence the stop of the standby with the start of
/// the active on its host.
///
/// Completion of everything the coordinator initiates arrives asynchronously
/// through the broker callbacks and the allocator, so every entry point must
/// be safe to run concurrently and idempotent where the broker may repeat
/// itself.
pub struct StandbyCoordinator {
	constraints: PlacementConstraints,
	state: Arc<ClusterState>,
	broker: Arc<dyn ClusterBroker>,
	job_model: Arc<dyn JobModelStore>,
	allocator: Arc<ContainerAllocator>,
	failovers: scc::HashMap<ResourceId, Arc<FailoverMetadata>>,
}

impl StandbyCoordinator {
	pub fn new(
		constraints: PlacementConstraints,
		state: Arc<ClusterState>,
		broker: Arc<dyn ClusterBroker>,
		job_model: Arc<dyn JobModelStore>,
		allocator: Arc<ContainerAllocator>,
	) -> Self {
		Self {
			constraints,
			state,
			broker,
			job_model,
			allocator,
			failovers: scc::HashMap::new(),
		}
	}

	/// Entry point for every container stop the broker reports.
	#[tracing::instrument(skip_all, fields(processor_id = %processor_id, resource_id = %resource_id, host = %host))]
	pub async fn handle_container_stop(
		&self,
		processor_id: ProcessorId,
		resource_id: ResourceId,
		host: HostName,
		exit_status: ExitStatus,
	) -> Result<()> {
		if processor_id.is_standby() {
			return self
				.handle_standby_container_stop(processor_id, resource_id, host)
				.await;
		}

		if exit_status.indicates_node_failure() {
			tracing::info!(
				?exit_status,
				"active lost to a node-level failure, starting standby-aware failover"
			);
			return self
				.initiate_standby_aware_allocation(&processor_id, &resource_id)
				.await;
		}

		// Unknown exit reason: retry the same host after a delay. If the
		// request ages out unmatched, the expiry path drives a full
		// failover against the metadata registered here.
		tracing::info!(?exit_status, "active stopped for an unknown reason, retrying its host");
		let metadata = self.register_active_failure(&processor_id, &resource_id);
		let request = self
			.allocator
			.new_delayed_request(processor_id, PreferredHost::Host(host));
		metadata.record_request(&request);
		self.allocator.issue_request(request).await
	}

	/// A worker failed to start on its resource.
	#[tracing::instrument(skip_all, fields(processor_id = %processor_id, resource_id = %resource_id))]
	pub async fn handle_launch_failure(
		&self,
		processor_id: ProcessorId,
		resource_id: ResourceId,
	) -> Result<()> {
		if processor_id.is_standby() {
			tracing::info!("standby failed to launch, requesting any-host placement");
			self.allocator
				.request_processor(processor_id, PreferredHost::Any)
				.await
		} else {
			self.initiate_standby_aware_allocation(&processor_id, &resource_id)
				.await
		}
	}

	async fn handle_standby_container_stop(
		&self,
		standby_id: ProcessorId,
		resource_id: ResourceId,
		host: HostName,
	) -> Result<()> {
		if let Some(metadata) = self.failover_using_standby_resource(&resource_id) {
			// The standby vacated its host so the failed active can take it:
			// chase the active onto that host, then find the standby a new
			// home anywhere.
			let standby_host = metadata.standby_host(&resource_id).with_context(|| {
				format!("failover for {} lost track of standby resource {resource_id}",
					metadata.active_resource_id())
			})?;
			tracing::info!(
				active = %metadata.active_processor_id(),
				standby = %standby_id,
				host = %standby_host,
				"standby vacated its host, moving the active in"
			);

			let active_request = self.allocator.new_delayed_request(
				metadata.active_processor_id().clone(),
				PreferredHost::Host(standby_host),
			);
			metadata.record_request(&active_request);
			self.allocator.issue_request(active_request).await?;

			let standby_request =
				self.allocator
					.new_request(standby_id, PreferredHost::Any, Duration::ZERO);
			metadata.record_request(&standby_request);
			self.allocator.issue_request(standby_request).await
		} else {
			// Ordinary standby exit: restart it where it was.
			tracing::info!(standby = %standby_id, "standby stopped outside any failover, restarting in place");
			self.allocator
				.request_processor_delayed(standby_id, PreferredHost::Host(host))
				.await
		}
	}

	/// The heart of failover: pick a standby host for the failed active and
	/// either request placement there directly or first stop the standby
	/// occupying it.
	#[tracing::instrument(skip_all, fields(active = %active_id, resource_id = %active_resource_id))]
	pub async fn initiate_standby_aware_allocation(
		&self,
		active_id: &ProcessorId,
		active_resource_id: &ResourceId,
	) -> Result<()> {
		let Some(host) = self.select_standby_host(active_id, active_resource_id) else {
			tracing::info!("no usable standby host, falling back to any-host placement");
			self.state
				.failovers_to_any_host
				.fetch_add(1, Ordering::Relaxed);
			return self
				.allocator
				.request_processor(active_id.clone(), PreferredHost::Any)
				.await;
		};

		let running_standbys: Vec<(ProcessorId, Resource)> = self
			.constraints
			.siblings(active_id)
			.filter_map(|sibling| {
				self.state
					.running_resource(sibling)
					.map(|resource| (sibling.clone(), resource))
			})
			.filter(|(_, resource)| resource.host == host)
			.collect();

		if running_standbys.is_empty() {
			// The chosen host is free of family members (e.g. selected from
			// last-known hosts, or the standby exited since selection).
			// Request the active there directly.
			let metadata = self.register_active_failure(active_id, active_resource_id);
			let request = self.allocator.new_request(
				active_id.clone(),
				PreferredHost::Host(host.clone()),
				Duration::ZERO,
			);
			metadata.record_request(&request);
			self.state
				.failovers_to_standby
				.fetch_add(1, Ordering::Relaxed);
			tracing::info!(host = %host, "requesting the active on a standby host");
			return self.allocator.issue_request(request).await;
		}

		if running_standbys.len() > 1 {
			// Two family members on one host: the placement invariant is
			// already broken and proceeding would make it worse.
			return Err(PlacementError::ColocatedReplicas {
				processor: active_id.clone(),
				host,
				count: running_standbys.len(),
			}
			.into());
		}

		let metadata = self.register_active_failure(active_id, active_resource_id);
		let (standby_id, standby_resource) = &running_standbys[0];
		metadata.record_selected_standby(standby_resource.id.clone(), host.clone());
		self.state
			.failovers_to_standby
			.fetch_add(1, Ordering::Relaxed);
		tracing::info!(
			standby = %standby_id,
			standby_resource = %standby_resource.id,
			host = %host,
			"stopping standby to vacate its host for the failed active"
		);
		// The standby may have exited on its own between selection and this
		// call; the broker stop is idempotent, so no re-check happens here.
		self.broker.stop_processor(standby_resource).await
	}

	/// Three-pass host selection. Pass 1: the host of a running standby not
	/// already consumed by this failover. Pass 2: a sibling's last-known
	/// host not already used. Pass 3: none, meaning any host. Sibling order
	/// is deterministic, so repeated attempts reproduce.
	fn select_standby_host(
		&self,
		active_id: &ProcessorId,
		active_resource_id: &ResourceId,
	) -> Option<HostName> {
		let metadata = self
			.failovers
			.read(active_resource_id, |_, metadata| metadata.clone());

		for sibling in self.constraints.siblings(active_id) {
			let Some(resource) = self.state.running_resource(sibling) else {
				continue;
			};
			let used = metadata
				.as_ref()
				.map(|m| m.uses_standby_resource(&resource.id))
				.unwrap_or(false);
			if !used {
				tracing::debug!(standby = %sibling, host = %resource.host, "selected a running standby's host");
				return Some(resource.host);
			}
		}

		for sibling in self.constraints.siblings(active_id) {
			let Some(host) = self.job_model.last_known_host(sibling) else {
				continue;
			};
			let used = metadata
				.as_ref()
				.map(|m| m.uses_standby_host(&host))
				.unwrap_or(false);
			if !used {
				tracing::debug!(standby = %sibling, host = %host, "selected a standby's last-known host");
				return Some(host);
			}
		}

		None
	}

	/// Final gate before launching on a matched resource: no member of the
	/// starter's replication group may be pending or running on the
	/// resource's host. On violation the match is unwound and replacement
	/// requests are issued.
	#[tracing::instrument(skip_all, fields(processor_id = %request.processor_id, host = %resource.host))]
	pub async fn check_constraints_and_run(
		&self,
		request: &ResourceRequest,
		preferred_host: PreferredHost,
		resource: &Resource,
	) -> Result<()> {
		let starter = &request.processor_id;
		let violation = self
			.constraints
			.siblings(starter)
			.find(|sibling| self.state.is_pending_or_running_on(sibling, &resource.host))
			.cloned();

		let Some(sibling) = violation else {
			return self.allocator.run_processor(request, preferred_host).await;
		};

		tracing::warn!(
			sibling = %sibling,
			"placement would colocate replication-group members, rejecting the match"
		);
		self.allocator
			.release_unstartable_container(resource, &preferred_host)
			.await?;
		self.allocator.cancel_request(request).await?;
		self.state
			.failed_standby_allocations
			.fetch_add(1, Ordering::Relaxed);

		if starter.is_standby() {
			self.allocator
				.request_processor(starter.clone(), PreferredHost::Any)
				.await
		} else {
			let last_known_resource_id = self
				.failover_owning_request(&request.id)
				.map(|metadata| metadata.active_resource_id().clone())
				.unwrap_or_else(|| ResourceId::unknown_for(starter));
			self.initiate_standby_aware_allocation(starter, &last_known_resource_id)
				.await
		}
	}

	/// A ready preferred-host request aged past the retry window without its
	/// host coming back.
	#[tracing::instrument(skip_all, fields(processor_id = %request.processor_id))]
	pub async fn handle_expired_request(
		&self,
		request: &ResourceRequest,
		alternative: Option<Resource>,
	) -> Result<()> {
		let processor_id = &request.processor_id;

		if processor_id.is_standby() {
			if let Some(resource) = alternative {
				tracing::info!(
					resource_id = %resource.id,
					host = %resource.host,
					"standby request expired, trying an available resource instead"
				);
				self.check_constraints_and_run(request, PreferredHost::Any, &resource)
					.await
			} else {
				self.allocator.cancel_request(request).await?;
				self.allocator
					.request_processor(processor_id.clone(), PreferredHost::Any)
					.await
			}
		} else {
			self.allocator.cancel_request(request).await?;
			let last_known_resource_id = self
				.failover_owning_request(&request.id)
				.map(|metadata| metadata.active_resource_id().clone())
				.unwrap_or_else(|| ResourceId::unknown_for(processor_id));
			self.initiate_standby_aware_allocation(processor_id, &last_known_resource_id)
				.await
		}
	}

	/// Registers a failed active, or returns the existing book-keeping when
	/// the same failed resource is reported again.
	pub fn register_active_failure(
		&self,
		active_id: &ProcessorId,
		active_resource_id: &ResourceId,
	) -> Arc<FailoverMetadata> {
		if let Some(existing) = self
			.failovers
			.read(active_resource_id, |_, metadata| metadata.clone())
		{
			return existing;
		}

		let metadata = Arc::new(FailoverMetadata::new(
			active_id.clone(),
			active_resource_id.clone(),
		));
		match self
			.failovers
			.insert(active_resource_id.clone(), metadata.clone())
		{
			Ok(()) => metadata,
			// Lost a registration race; use the winner's entry.
			Err(_) => self
				.failovers
				.read(active_resource_id, |_, metadata| metadata.clone())
				.unwrap_or(metadata),
		}
	}

	/// The failover episode for a processor ends once it is confirmed
	/// running; drop the book-keeping for all of its past incarnations.
	pub fn clear_failovers_for(&self, processor_id: &ProcessorId) {
		self.failovers
			.retain(|_, metadata| metadata.active_processor_id() != processor_id);
	}

	pub fn failover(&self, active_resource_id: &ResourceId) -> Option<Arc<FailoverMetadata>> {
		self.failovers
			.read(active_resource_id, |_, metadata| metadata.clone())
	}

	pub fn failover_count(&self) -> usize {
		self.failovers.len()
	}

	fn failover_using_standby_resource(
		&self,
		resource_id: &ResourceId,
	) -> Option<Arc<FailoverMetadata>> {
		let mut found = None;
		self.failovers.scan(|_, metadata| {
			if found.is_none() && metadata.uses_standby_resource(resource_id) {
				found = Some(metadata.clone());
			}
		});
		found
	}

	fn failover_owning_request(&self, request_id: &RequestId) -> Option<Arc<FailoverMetadata>> {
		let mut found = None;
		self.failovers.scan(|_, metadata| {
			if found.is_none() && metadata.owns_request(request_id) {
				found = Some(metadata.clone());
			}
		});
		found
	}
}

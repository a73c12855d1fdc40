use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use understudy_config::Config;
use understudy_types::{
	ExitStatus, HostName, PreferredHost, ProcessorId, Resource, ResourceId, ResourceRequest,
};

use crate::allocator::ContainerAllocator;
use crate::broker::ClusterBroker;
use crate::command::CommandBuilderRegistry;
use crate::constraints::PlacementConstraints;
use crate::job_model::JobModelStore;
use crate::request_state::RequestState;
use crate::standby::StandbyCoordinator;
use crate::state::ClusterState;

/// Wires the allocator and the standby coordinator together at startup and
/// exposes the callback surface the broker adapter drives.
///
/// Callback methods are called from the broker's own tasks and never block
/// on the allocator loop.
pub struct ClusterManager {
	config: Config,
	state: Arc<ClusterState>,
	requests: Arc<RequestState>,
	allocator: Arc<ContainerAllocator>,
	standby: Option<Arc<StandbyCoordinator>>,
	job_model: Arc<dyn JobModelStore>,
	allocator_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ClusterManager {
	pub fn new(
		config: Config,
		broker: Arc<dyn ClusterBroker>,
		job_model: Arc<dyn JobModelStore>,
		registry: &CommandBuilderRegistry,
	) -> Result<Arc<Self>> {
		let cluster = config.cluster();
		let command_builder = registry.create(cluster.command_builder())?;

		let state = Arc::new(ClusterState::new());
		let requests = Arc::new(RequestState::new(broker.clone()));
		let allocator = Arc::new(ContainerAllocator::new(
			config.clone(),
			state.clone(),
			requests.clone(),
			broker.clone(),
			job_model.clone(),
			command_builder,
		));

		let standby = (cluster.host_affinity() && cluster.standby_enabled()).then(|| {
			let constraints = PlacementConstraints::build(job_model.processor_ids());
			tracing::info!(
				families = constraints.len(),
				"standby failover coordination enabled"
			);
			Arc::new(StandbyCoordinator::new(
				constraints,
				state.clone(),
				broker.clone(),
				job_model.clone(),
				allocator.clone(),
			))
		});

		Ok(Arc::new(Self {
			config,
			state,
			requests,
			allocator,
			standby,
			job_model,
			allocator_task: Mutex::new(None),
		}))
	}

	/// Requests one resource per processor in the job model and spawns the
	/// allocator loop.
	#[tracing::instrument(skip_all)]
	pub async fn start(&self) -> Result<()> {
		let host_affinity = self.config.cluster().host_affinity();
		for processor_id in self.job_model.processor_ids() {
			let preferred_host = if host_affinity {
				self.job_model
					.last_known_host(&processor_id)
					.map(PreferredHost::Host)
					.unwrap_or(PreferredHost::Any)
			} else {
				PreferredHost::Any
			};
			self.allocator
				.request_processor(processor_id, preferred_host)
				.await?;
		}

		let allocator = self.allocator.clone();
		let standby = self.standby.clone();
		let handle = tokio::spawn(async move { allocator.run(standby).await });
		*self.allocator_task.lock() = Some(handle);
		Ok(())
	}

	/// Stops the allocator loop and waits for it to exit.
	pub async fn stop(&self) {
		self.allocator.stop();
		let handle = self.allocator_task.lock().take();
		if let Some(handle) = handle {
			match handle.await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => tracing::error!(?err, "allocator exited with an error"),
				Err(err) => tracing::error!(?err, "allocator task panicked"),
			}
		}
	}

	/// The broker handed back an allocation.
	pub fn on_resource_allocated(&self, resource: Resource) {
		self.requests.add_resource(resource);
	}

	/// The broker confirmed a launched processor is up.
	pub fn on_processor_running(&self, processor_id: &ProcessorId) {
		match self.state.mark_running(processor_id) {
			Some(resource) => {
				tracing::info!(
					processor_id = %processor_id,
					resource_id = %resource.id,
					host = %resource.host,
					"processor running"
				);
			}
			None => {
				tracing::warn!(
					processor_id = %processor_id,
					"running confirmation for a processor that was not pending"
				);
			}
		}

		// A confirmed active ends its failover episode; keeping the
		// book-keeping would only pin dead resource ids forever.
		if !processor_id.is_standby() {
			if let Some(standby) = &self.standby {
				standby.clear_failovers_for(processor_id);
			}
		}
	}

	/// The broker reported a container stop.
	pub async fn on_processor_stopped(
		&self,
		processor_id: ProcessorId,
		resource_id: ResourceId,
		host: HostName,
		exit_status: ExitStatus,
	) -> Result<()> {
		let _ = self.state.forget(&processor_id);
		tracing::info!(
			processor_id = %processor_id,
			resource_id = %resource_id,
			host = %host,
			?exit_status,
			"processor stopped"
		);

		match &self.standby {
			Some(standby) => {
				standby
					.handle_container_stop(processor_id, resource_id, host, exit_status)
					.await
			}
			None => {
				// No standby coordination: plain restart, preferring the old
				// host when affinity is on.
				let preferred_host = if self.config.cluster().host_affinity() {
					PreferredHost::Host(host)
				} else {
					PreferredHost::Any
				};
				self.allocator
					.request_processor(processor_id, preferred_host)
					.await
			}
		}
	}

	/// A broker that tracks request deadlines itself reported one as
	/// expired. The allocator also detects expiry on its own passes; both
	/// routes converge on the same handling.
	pub async fn on_resource_request_expired(
		&self,
		request: &ResourceRequest,
		alternative: Option<Resource>,
	) -> Result<()> {
		match &self.standby {
			Some(standby) => standby.handle_expired_request(request, alternative).await,
			None => {
				self.requests.cancel_request(request).await?;
				self.allocator
					.request_processor(request.processor_id.clone(), PreferredHost::Any)
					.await
			}
		}
	}

	/// The broker could not start the worker on its resource.
	pub async fn on_launch_failed(
		&self,
		processor_id: ProcessorId,
		resource_id: ResourceId,
	) -> Result<()> {
		let _ = self.state.pending.remove(&processor_id);
		tracing::warn!(
			processor_id = %processor_id,
			resource_id = %resource_id,
			"processor launch failed"
		);

		match &self.standby {
			Some(standby) => {
				standby
					.handle_launch_failure(processor_id, resource_id)
					.await
			}
			None => {
				self.allocator
					.request_processor(processor_id, PreferredHost::Any)
					.await
			}
		}
	}

	pub fn state(&self) -> &Arc<ClusterState> {
		&self.state
	}

	pub fn requests(&self) -> &Arc<RequestState> {
		&self.requests
	}

	pub fn allocator(&self) -> &Arc<ContainerAllocator> {
		&self.allocator
	}

	pub fn standby(&self) -> Option<&Arc<StandbyCoordinator>> {
		self.standby.as_ref()
	}
}

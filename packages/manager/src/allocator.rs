use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use understudy_config::Config;
use understudy_types::{PreferredHost, ProcessorId, Resource, ResourceRequest};
use understudy_util::timestamp;

use crate::broker::ClusterBroker;
use crate::command::CommandBuilder;
use crate::errors::PlacementError;
use crate::job_model::JobModelStore;
use crate::metrics;
use crate::request_state::RequestState;
use crate::standby::StandbyCoordinator;
use crate::state::ClusterState;

/// The control loop that matches outstanding resource requests against
/// resources the broker has handed back and launches workers on the matches.
///
/// Two placement policies exist: any-host (first request gets the first
/// resource) and host-aware (requests wait for their preferred host until
/// the retry window lapses). The policy is chosen by `cluster.host_affinity`.
pub struct ContainerAllocator {
	config: Config,
	state: Arc<ClusterState>,
	requests: Arc<RequestState>,
	broker: Arc<dyn ClusterBroker>,
	job_model: Arc<dyn JobModelStore>,
	command_builder: Arc<dyn CommandBuilder>,
	running: AtomicBool,
}

impl ContainerAllocator {
	pub fn new(
		config: Config,
		state: Arc<ClusterState>,
		requests: Arc<RequestState>,
		broker: Arc<dyn ClusterBroker>,
		job_model: Arc<dyn JobModelStore>,
		command_builder: Arc<dyn CommandBuilder>,
	) -> Self {
		Self {
			config,
			state,
			requests,
			broker,
			job_model,
			command_builder,
			running: AtomicBool::new(true),
		}
	}

	/// Runs until `stop` clears the running flag. Transient errors are
	/// logged and the next pass retries; placement invariant violations
	/// abort the loop so the host process can restart.
	#[tracing::instrument(skip_all)]
	pub async fn run(self: Arc<Self>, standby: Option<Arc<StandbyCoordinator>>) -> Result<()> {
		let mut interval = tokio::time::interval(Duration::from_millis(
			self.config.cluster().allocator_sleep(),
		));
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		tracing::info!(
			host_affinity = self.config.cluster().host_affinity(),
			standby = standby.is_some(),
			"allocator loop starting"
		);

		while self.running.load(Ordering::Acquire) {
			interval.tick().await;

			if let Err(err) = self.pass(standby.as_deref()).await {
				if err.is::<PlacementError>() {
					tracing::error!(?err, "placement invariant violated, aborting allocator");
					return Err(err);
				}
				tracing::error!(?err, "allocator pass failed, retrying next interval");
			}
		}

		tracing::info!("allocator loop stopped");
		Ok(())
	}

	/// Clears the running flag; the loop exits at the next iteration
	/// boundary. In-flight broker calls are not interrupted.
	pub fn stop(&self) {
		self.running.store(false, Ordering::Release);
	}

	/// One full allocator pass: assign what can be assigned, shed surplus
	/// allocations, publish gauges.
	pub async fn pass(&self, standby: Option<&StandbyCoordinator>) -> Result<()> {
		self.assign_resource_requests(standby).await?;
		self.requests.release_extra_resources(&self.state).await?;
		metrics::publish(&self.state, &self.requests);
		Ok(())
	}

	pub async fn assign_resource_requests(
		&self,
		standby: Option<&StandbyCoordinator>,
	) -> Result<()> {
		if self.config.cluster().host_affinity() {
			self.assign_host_aware(standby).await
		} else {
			self.assign_any_host().await
		}
	}

	async fn assign_any_host(&self) -> Result<()> {
		loop {
			let now = timestamp::now();
			let Some(request) = self.requests.peek_ready_request(now) else {
				break;
			};
			if self.requests.peek_resource(&PreferredHost::Any).is_none() {
				break;
			}
			self.run_processor(&request, PreferredHost::Any).await?;
		}
		Ok(())
	}

	async fn assign_host_aware(&self, standby: Option<&StandbyCoordinator>) -> Result<()> {
		let expiry = self.config.cluster().preferred_host_retry_delay() as i64;

		loop {
			let now = timestamp::now();
			let Some(request) = self.requests.peek_ready_request(now) else {
				break;
			};

			match request.preferred_host.clone() {
				PreferredHost::Host(host) => {
					if let Some(resource) = self.requests.peek_resource(&request.preferred_host) {
						match standby {
							Some(coordinator) => {
								coordinator
									.check_constraints_and_run(
										&request,
										request.preferred_host.clone(),
										&resource,
									)
									.await?
							}
							None => {
								self.run_processor(&request, request.preferred_host.clone())
									.await?
							}
						}
					} else if request.age(now) > expiry {
						self.state.expired_requests.fetch_add(1, Ordering::Relaxed);
						tracing::info!(
							processor_id = %request.processor_id,
							host = %host,
							age_ms = request.age(now),
							"request expired waiting for its preferred host"
						);
						let alternative = self.requests.peek_resource(&PreferredHost::Any);
						match standby {
							Some(coordinator) => {
								coordinator.handle_expired_request(&request, alternative).await?
							}
							None => {
								// No failover coordination: fall back to any
								// host directly.
								self.cancel_request(&request).await?;
								self.request_processor(
									request.processor_id.clone(),
									PreferredHost::Any,
								)
								.await?;
							}
						}
					} else {
						// Keep waiting for the preferred host; nothing
						// behind this request can jump the queue.
						break;
					}
				}
				PreferredHost::Any => {
					let Some(resource) = self.requests.peek_resource(&PreferredHost::Any) else {
						break;
					};
					match standby {
						Some(coordinator) => {
							coordinator
								.check_constraints_and_run(&request, PreferredHost::Any, &resource)
								.await?
						}
						None => self.run_processor(&request, PreferredHost::Any).await?,
					}
				}
			}
		}
		Ok(())
	}

	/// Consumes the request and the matched resource, records the processor
	/// as pending and asks the broker to launch it.
	///
	/// The pending insert happens before the launch call; the running
	/// callback must never observe a missing pending entry.
	#[tracing::instrument(skip_all, fields(processor_id = %request.processor_id, preferred_host = %preferred_host))]
	pub async fn run_processor(
		&self,
		request: &ResourceRequest,
		preferred_host: PreferredHost,
	) -> Result<()> {
		let resource = self
			.requests
			.peek_resource(&preferred_host)
			.with_context(|| format!("no resource allocated for {preferred_host}"))?;

		if let PreferredHost::Host(host) = &preferred_host {
			if resource.host != *host {
				return Err(PlacementError::HostMismatch {
					resource: resource.id.clone(),
					actual: resource.host.clone(),
					expected: host.clone(),
				}
				.into());
			}
		}

		self.requests
			.update_state_after_assignment(&self.state, request, &preferred_host, &resource);
		self.state
			.pending
			.upsert(request.processor_id.clone(), resource.clone());
		self.state
			.launched_processors
			.fetch_add(1, Ordering::Relaxed);

		let command = self.command_builder.build(
			&self.config,
			&request.processor_id,
			&self.job_model.server_url(),
		);
		tracing::info!(
			resource_id = %resource.id,
			host = %resource.host,
			"launching processor"
		);
		self.broker.launch_processor(&resource, command).await
	}

	/// Builds a request sized per the configured container dimensions,
	/// eligible `delay` from now.
	pub(crate) fn new_request(
		&self,
		processor_id: ProcessorId,
		preferred_host: PreferredHost,
		delay: Duration,
	) -> ResourceRequest {
		let cluster = self.config.cluster();
		ResourceRequest::new(
			processor_id,
			preferred_host,
			cluster.container_cpu_cores(),
			cluster.container_memory_mb(),
			timestamp::now() + delay.as_millis() as i64,
		)
	}

	/// Builds a request delayed by the configured preferred-host retry
	/// window.
	pub(crate) fn new_delayed_request(
		&self,
		processor_id: ProcessorId,
		preferred_host: PreferredHost,
	) -> ResourceRequest {
		let delay = Duration::from_millis(self.config.cluster().preferred_host_retry_delay());
		self.new_request(processor_id, preferred_host, delay)
	}

	/// Places a built request into the request state and bumps the issuance
	/// counter for its preference kind.
	pub(crate) async fn issue_request(&self, request: ResourceRequest) -> Result<()> {
		match request.preferred_host {
			PreferredHost::Any => self
				.state
				.any_host_requests
				.fetch_add(1, Ordering::Relaxed),
			PreferredHost::Host(_) => self
				.state
				.preferred_host_requests
				.fetch_add(1, Ordering::Relaxed),
		};
		self.requests.add_request(request).await
	}

	/// Requests one container for the processor, immediately eligible.
	pub async fn request_processor(
		&self,
		processor_id: ProcessorId,
		preferred_host: PreferredHost,
	) -> Result<()> {
		let request = self.new_request(processor_id, preferred_host, Duration::ZERO);
		self.issue_request(request).await
	}

	/// Requests one container for the processor after the retry delay.
	pub async fn request_processor_delayed(
		&self,
		processor_id: ProcessorId,
		preferred_host: PreferredHost,
	) -> Result<()> {
		let request = self.new_delayed_request(processor_id, preferred_host);
		self.issue_request(request).await
	}

	pub(crate) async fn cancel_request(&self, request: &ResourceRequest) -> Result<()> {
		self.requests.cancel_request(request).await
	}

	pub(crate) async fn release_unstartable_container(
		&self,
		resource: &Resource,
		preferred_host: &PreferredHost,
	) -> Result<()> {
		self.requests
			.release_unstartable_container(resource, preferred_host)
			.await
	}

	pub fn state(&self) -> &Arc<ClusterState> {
		&self.state
	}

	pub fn requests(&self) -> &Arc<RequestState> {
		&self.requests
	}
}

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use understudy_config::{Cluster, Config};
use understudy_manager::{
	ClusterBroker, ClusterManager, CommandBuilderRegistry, CommandSpec, StaticJobModel,
};
use understudy_types::{
	HostName, PreferredHost, ProcessorId, Resource, ResourceId, ResourceRequest,
};

#[derive(Clone, Debug, PartialEq)]
pub enum BrokerCall {
	Request {
		processor_id: ProcessorId,
		preferred_host: PreferredHost,
	},
	Cancel {
		processor_id: ProcessorId,
	},
	Release {
		resource_id: ResourceId,
	},
	Launch {
		processor_id: ProcessorId,
		resource_id: ResourceId,
	},
	Stop {
		resource_id: ResourceId,
	},
}

/// Broker double that records every call in order.
#[derive(Default)]
pub struct RecordingBroker {
	calls: Mutex<Vec<BrokerCall>>,
}

impl RecordingBroker {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn calls(&self) -> Vec<BrokerCall> {
		self.calls.lock().clone()
	}

	pub fn requests(&self) -> Vec<(ProcessorId, PreferredHost)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				BrokerCall::Request {
					processor_id,
					preferred_host,
				} => Some((processor_id, preferred_host)),
				_ => None,
			})
			.collect()
	}

	pub fn cancels(&self) -> Vec<ProcessorId> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				BrokerCall::Cancel { processor_id } => Some(processor_id),
				_ => None,
			})
			.collect()
	}

	pub fn releases(&self) -> Vec<ResourceId> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				BrokerCall::Release { resource_id } => Some(resource_id),
				_ => None,
			})
			.collect()
	}

	pub fn launches(&self) -> Vec<(ProcessorId, ResourceId)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				BrokerCall::Launch {
					processor_id,
					resource_id,
				} => Some((processor_id, resource_id)),
				_ => None,
			})
			.collect()
	}

	pub fn stops(&self) -> Vec<ResourceId> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				BrokerCall::Stop { resource_id } => Some(resource_id),
				_ => None,
			})
			.collect()
	}
}

#[async_trait]
impl ClusterBroker for RecordingBroker {
	async fn request_resource(&self, request: &ResourceRequest) -> Result<()> {
		self.calls.lock().push(BrokerCall::Request {
			processor_id: request.processor_id.clone(),
			preferred_host: request.preferred_host.clone(),
		});
		Ok(())
	}

	async fn cancel_resource_request(&self, request: &ResourceRequest) -> Result<()> {
		self.calls.lock().push(BrokerCall::Cancel {
			processor_id: request.processor_id.clone(),
		});
		Ok(())
	}

	async fn release_resource(&self, resource: &Resource) -> Result<()> {
		self.calls.lock().push(BrokerCall::Release {
			resource_id: resource.id.clone(),
		});
		Ok(())
	}

	async fn launch_processor(&self, resource: &Resource, command: CommandSpec) -> Result<()> {
		let processor_id = command
			.env
			.get("PROCESSOR_ID")
			.map(|id| ProcessorId::from(id.as_str()))
			.unwrap_or_else(|| ProcessorId::from("?"));
		self.calls.lock().push(BrokerCall::Launch {
			processor_id,
			resource_id: resource.id.clone(),
		});
		Ok(())
	}

	async fn stop_processor(&self, resource: &Resource) -> Result<()> {
		self.calls.lock().push(BrokerCall::Stop {
			resource_id: resource.id.clone(),
		});
		Ok(())
	}
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn test_config() -> Config {
	Config {
		cluster: Cluster {
			allocator_sleep: Some(20),
			preferred_host_retry_delay: Some(1000),
			..Default::default()
		},
	}
}

pub fn resource(id: &str, host: &str) -> Resource {
	Resource {
		id: ResourceId::from(id),
		host: HostName::from(host),
		cpu_cores: 1,
		memory_mb: 1024,
	}
}

pub fn job_model(processors: &[&str]) -> Arc<StaticJobModel> {
	Arc::new(StaticJobModel::new(
		processors.iter().map(|id| ProcessorId::from(*id)),
		"http://coordinator:5900",
	))
}

pub fn manager_with(
	config: Config,
	processors: &[&str],
) -> (Arc<ClusterManager>, Arc<RecordingBroker>, Arc<StaticJobModel>) {
	init_tracing();
	let broker = RecordingBroker::new();
	let model = job_model(processors);
	let manager = ClusterManager::new(
		config,
		broker.clone(),
		model.clone(),
		&CommandBuilderRegistry::new(),
	)
	.expect("manager construction");
	(manager, broker, model)
}

pub fn manager_for(
	processors: &[&str],
) -> (Arc<ClusterManager>, Arc<RecordingBroker>, Arc<StaticJobModel>) {
	manager_with(test_config(), processors)
}

use anyhow::Result;
use async_trait::async_trait;
use understudy_types::{Resource, ResourceRequest};

use crate::command::CommandSpec;

/// Adapter to the external cluster resource broker.
///
/// Implementations speak the actual cluster protocol. All calls are
/// asynchronous; completion of launches and stops is reported back through
/// the manager's callback surface, not through these return values.
#[async_trait]
pub trait ClusterBroker: Send + Sync {
	/// Ask the broker for one container-sized resource matching the request.
	async fn request_resource(&self, request: &ResourceRequest) -> Result<()>;

	/// Withdraw an outstanding request.
	async fn cancel_resource_request(&self, request: &ResourceRequest) -> Result<()>;

	/// Hand an allocated resource back to the broker unused.
	async fn release_resource(&self, resource: &Resource) -> Result<()>;

	/// Start a worker on the resource.
	async fn launch_processor(&self, resource: &Resource, command: CommandSpec) -> Result<()>;

	/// Stop the worker on the resource. Idempotent: stopping a container
	/// that already exited is a no-op.
	async fn stop_processor(&self, resource: &Resource) -> Result<()>;
}

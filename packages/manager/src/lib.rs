pub mod allocator;
pub mod broker;
pub mod command;
pub mod constraints;
pub mod errors;
pub mod job_model;
pub mod manager;
pub mod metrics;
pub mod request_state;
pub mod standby;
pub mod state;

pub use allocator::ContainerAllocator;
pub use broker::ClusterBroker;
pub use command::{CommandBuilder, CommandBuilderRegistry, CommandSpec, ShellCommandBuilder};
pub use constraints::PlacementConstraints;
pub use errors::PlacementError;
pub use job_model::{JobModelStore, StaticJobModel};
pub use manager::ClusterManager;
pub use request_state::RequestState;
pub use standby::{FailoverMetadata, StandbyCoordinator};
pub use state::ClusterState;

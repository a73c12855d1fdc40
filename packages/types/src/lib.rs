mod exit;
mod processor;
mod request;
mod resource;

pub use exit::ExitStatus;
pub use processor::ProcessorId;
pub use request::{RequestId, ResourceRequest};
pub use resource::{HostName, PreferredHost, Resource, ResourceId};

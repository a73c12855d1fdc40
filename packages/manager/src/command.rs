use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use understudy_config::Config;
use understudy_types::ProcessorId;

/// Opaque launch command handed to the broker alongside a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
	pub program: String,
	pub args: Vec<String>,
	pub env: HashMap<String, String>,
}

/// Materializes the launch command for one processor.
pub trait CommandBuilder: Send + Sync {
	fn build(&self, config: &Config, processor_id: &ProcessorId, server_url: &str) -> CommandSpec;
}

/// Default builder: runs the worker launch script with the processor's
/// identity and the job-model server url in its environment.
pub struct ShellCommandBuilder;

impl CommandBuilder for ShellCommandBuilder {
	fn build(&self, config: &Config, processor_id: &ProcessorId, server_url: &str) -> CommandSpec {
		let mut env = HashMap::new();
		env.insert("PROCESSOR_ID".to_string(), processor_id.to_string());
		env.insert("JOB_SERVER_URL".to_string(), server_url.to_string());
		env.insert(
			"PROCESSOR_MEMORY_MB".to_string(),
			config.cluster().container_memory_mb().to_string(),
		);

		CommandSpec {
			program: "bin/run-processor.sh".to_string(),
			args: Vec::new(),
			env,
		}
	}
}

type BuilderFactory = Box<dyn Fn() -> Arc<dyn CommandBuilder> + Send + Sync>;

/// Factory functions keyed by the name configured under
/// `cluster.command_builder`. Deployments register their own builders at
/// startup; `"shell"` is built in.
pub struct CommandBuilderRegistry {
	factories: HashMap<String, BuilderFactory>,
}

impl CommandBuilderRegistry {
	pub fn new() -> Self {
		let mut registry = Self {
			factories: HashMap::new(),
		};
		registry.register("shell", || Arc::new(ShellCommandBuilder));
		registry
	}

	pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
	where
		F: Fn() -> Arc<dyn CommandBuilder> + Send + Sync + 'static,
	{
		self.factories.insert(name.into(), Box::new(factory));
	}

	pub fn create(&self, name: &str) -> Result<Arc<dyn CommandBuilder>> {
		let factory = self
			.factories
			.get(name)
			.with_context(|| format!("no command builder registered under {name:?}"))?;
		Ok(factory())
	}
}

impl Default for CommandBuilderRegistry {
	fn default() -> Self {
		Self::new()
	}
}

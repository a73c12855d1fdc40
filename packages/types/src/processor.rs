use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one logical stream processor.
///
/// Standby replicas are recognizable syntactically: an active is a bare id
/// (`"3"`), its k-th standby appends a replica ordinal (`"3-k"`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessorId(String);

impl ProcessorId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_standby(&self) -> bool {
		self.0.contains('-')
	}

	/// The active this standby replicates. `None` when the id already names
	/// an active.
	pub fn active(&self) -> Option<ProcessorId> {
		self.0
			.split_once('-')
			.map(|(active, _)| ProcessorId(active.to_string()))
	}
}

impl fmt::Display for ProcessorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ProcessorId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn standby_ids_carry_a_replica_ordinal() {
		assert!(!ProcessorId::from("3").is_standby());
		assert!(ProcessorId::from("3-0").is_standby());
		assert!(ProcessorId::from("3-12").is_standby());
	}

	#[test]
	fn standby_resolves_to_its_active() {
		assert_eq!(
			ProcessorId::from("3-1").active(),
			Some(ProcessorId::from("3"))
		);
		assert_eq!(ProcessorId::from("3").active(), None);
	}
}

use std::collections::{BTreeMap, BTreeSet};

use understudy_types::ProcessorId;

/// For each processor, the other members of its active-plus-standbys family.
/// No two members of a family may ever share a host.
///
/// Built once at startup from the job model; read-only afterwards. The
/// relation is symmetric and the families partition the processor set.
#[derive(Debug, Default)]
pub struct PlacementConstraints {
	families: BTreeMap<ProcessorId, BTreeSet<ProcessorId>>,
}

impl PlacementConstraints {
	pub fn build(processor_ids: impl IntoIterator<Item = ProcessorId>) -> Self {
		let mut groups: BTreeMap<ProcessorId, BTreeSet<ProcessorId>> = BTreeMap::new();
		for id in processor_ids {
			let active = id.active().unwrap_or_else(|| id.clone());
			groups.entry(active).or_default().insert(id);
		}

		let mut families = BTreeMap::new();
		for members in groups.values() {
			for id in members {
				let mut rest = members.clone();
				rest.remove(id);
				families.insert(id.clone(), rest);
			}
		}

		Self { families }
	}

	/// Family members of `id`, excluding `id` itself. Iteration order is
	/// sorted by processor id so repeated placement decisions reproduce.
	pub fn siblings(&self, id: &ProcessorId) -> impl Iterator<Item = &ProcessorId> + '_ {
		self.families.get(id).into_iter().flatten()
	}

	pub fn len(&self) -> usize {
		self.families.len()
	}

	pub fn is_empty(&self) -> bool {
		self.families.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ids(raw: &[&str]) -> Vec<ProcessorId> {
		raw.iter().map(|id| ProcessorId::from(*id)).collect()
	}

	#[test]
	fn families_partition_the_processor_set() {
		let constraints = PlacementConstraints::build(ids(&["0", "0-0", "0-1", "1", "1-0"]));

		let family_of_0: Vec<_> = constraints
			.siblings(&ProcessorId::from("0"))
			.cloned()
			.collect();
		assert_eq!(family_of_0, ids(&["0-0", "0-1"]));

		let family_of_1: Vec<_> = constraints
			.siblings(&ProcessorId::from("1"))
			.cloned()
			.collect();
		assert_eq!(family_of_1, ids(&["1-0"]));
	}

	#[test]
	fn relation_is_symmetric() {
		let constraints = PlacementConstraints::build(ids(&["0", "0-0"]));
		assert!(constraints
			.siblings(&ProcessorId::from("0"))
			.any(|id| id == &ProcessorId::from("0-0")));
		assert!(constraints
			.siblings(&ProcessorId::from("0-0"))
			.any(|id| id == &ProcessorId::from("0")));
	}

	#[test]
	fn active_without_standbys_has_no_siblings() {
		let constraints = PlacementConstraints::build(ids(&["7"]));
		assert_eq!(constraints.siblings(&ProcessorId::from("7")).count(), 0);
	}

	#[test]
	fn unknown_processor_has_no_siblings() {
		let constraints = PlacementConstraints::build(ids(&["0", "0-0"]));
		assert_eq!(constraints.siblings(&ProcessorId::from("9")).count(), 0);
	}
}

use std::sync::atomic::Ordering;

use opentelemetry::global;
use opentelemetry::metrics::{Gauge, Meter};

use crate::request_state::RequestState;
use crate::state::ClusterState;

lazy_static::lazy_static! {
	static ref METER: Meter = global::meter("understudy-manager");

	pub static ref PENDING_PROCESSORS: Gauge<u64> = METER.u64_gauge("understudy_pending_processors")
		.with_description("Processors launched and awaiting a running confirmation.")
		.build();
	pub static ref RUNNING_PROCESSORS: Gauge<u64> = METER.u64_gauge("understudy_running_processors")
		.with_description("Processors confirmed running.")
		.build();
	pub static ref OUTSTANDING_REQUESTS: Gauge<u64> = METER.u64_gauge("understudy_outstanding_requests")
		.with_description("Resource requests not yet matched or cancelled.")
		.build();
	pub static ref ALLOCATED_RESOURCES: Gauge<u64> = METER.u64_gauge("understudy_allocated_resources")
		.with_description("Broker allocations waiting to be matched.")
		.build();
	pub static ref FAILOVERS_TO_STANDBY: Gauge<u64> = METER.u64_gauge("understudy_failovers_to_standby")
		.with_description("Failovers that targeted a standby host.")
		.build();
	pub static ref FAILOVERS_TO_ANY_HOST: Gauge<u64> = METER.u64_gauge("understudy_failovers_to_any_host")
		.with_description("Failovers that fell back to any-host placement.")
		.build();
	pub static ref FAILED_STANDBY_ALLOCATIONS: Gauge<u64> = METER.u64_gauge("understudy_failed_standby_allocations")
		.with_description("Placements rejected for violating replication-group constraints.")
		.build();
	pub static ref EXPIRED_REQUESTS: Gauge<u64> = METER.u64_gauge("understudy_expired_requests")
		.with_description("Preferred-host requests that aged out unmatched.")
		.build();
}

/// Publishes the shared-state counters. Called once per allocator pass.
pub fn publish(state: &ClusterState, requests: &RequestState) {
	PENDING_PROCESSORS.record(state.pending.len() as u64, &[]);
	RUNNING_PROCESSORS.record(state.running.len() as u64, &[]);
	OUTSTANDING_REQUESTS.record(requests.request_count() as u64, &[]);
	ALLOCATED_RESOURCES.record(requests.resource_count() as u64, &[]);
	FAILOVERS_TO_STANDBY.record(state.failovers_to_standby.load(Ordering::Relaxed), &[]);
	FAILOVERS_TO_ANY_HOST.record(state.failovers_to_any_host.load(Ordering::Relaxed), &[]);
	FAILED_STANDBY_ALLOCATIONS.record(
		state.failed_standby_allocations.load(Ordering::Relaxed),
		&[],
	);
	EXPIRED_REQUESTS.record(state.expired_requests.load(Ordering::Relaxed), &[]);
}

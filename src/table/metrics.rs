//! `RebalanceMetrics`: OpenTelemetry instruments recorded at the call sites
//! spec.md names (PART_LOADED/OBJECT_LOADED/STOPPED), shaped after the
//! teacher's per-table `TableMetrics`/`BlockManager` metrics structs.

use opentelemetry::{global, metrics::*};

pub struct RebalanceMetrics {
	pub(crate) objects_loaded: Counter<u64>,
	pub(crate) partitions_completed: Counter<u64>,
	pub(crate) partitions_missed: Counter<u64>,
	pub(crate) rebalance_duration: Histogram<f64>,
	pub(crate) sync_items_sent: Counter<u64>,
	pub(crate) sync_items_received: Counter<u64>,
}

impl RebalanceMetrics {
	pub fn new(cache_name: &'static str) -> Self {
		let meter = global::meter(cache_name);
		Self {
			objects_loaded: meter
				.u64_counter("rebalance.objects_loaded")
				.with_description("Number of entries installed locally via partition preload")
				.init(),
			partitions_completed: meter
				.u64_counter("rebalance.partitions_completed")
				.with_description("Number of partitions that transitioned from MOVING to OWNING")
				.init(),
			partitions_missed: meter
				.u64_counter("rebalance.partitions_missed")
				.with_description("Number of partitions reported missed by a supplier during a rebalance round")
				.init(),
			rebalance_duration: meter
				.f64_histogram("rebalance.round_duration")
				.with_description("Duration of a rebalance round from assignment to future completion, in seconds")
				.init(),
			sync_items_sent: meter
				.u64_counter("rebalance.sync_items_sent")
				.with_description("Number of items sent to a peer by the anti-entropy syncer")
				.init(),
			sync_items_received: meter
				.u64_counter("rebalance.sync_items_received")
				.with_description("Number of items received from a peer by the anti-entropy syncer")
				.init(),
		}
	}
}

//! `AssignmentBatch`: the immutable input handed to a `Demander` by the
//! exchange layer on every topology change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shardkv_rpc::layout::{PartitionId, TopologyVersion};
use shardkv_util::data::NodeId;

pub type PartitionSet = std::collections::BTreeSet<PartitionId>;
pub type SupplierId = NodeId;

/// An opaque handle back to the exchange round that produced a batch, used
/// only for event emission and to correlate dummy re-exchanges.
pub type ExchangeId = u64;

/// Supplier → partitions map for a single topology version. Produced by the
/// (external, unspecified) exchange manager and consumed read-only by the
/// `Demander`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignmentBatch {
	pub topology_version: TopologyVersion,
	pub exchange_id: ExchangeId,
	per_supplier: BTreeMap<SupplierId, PartitionSet>,
}

impl AssignmentBatch {
	pub fn new(topology_version: TopologyVersion, exchange_id: ExchangeId) -> Self {
		Self {
			topology_version,
			exchange_id,
			per_supplier: BTreeMap::new(),
		}
	}

	pub fn with_supplier(mut self, supplier: SupplierId, partitions: PartitionSet) -> Self {
		if !partitions.is_empty() {
			self.per_supplier.insert(supplier, partitions);
		}
		self
	}

	pub fn is_empty(&self) -> bool {
		self.per_supplier.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&SupplierId, &PartitionSet)> {
		self.per_supplier.iter()
	}

	pub fn len(&self) -> usize {
		self.per_supplier.len()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn node(b: u8) -> NodeId {
		NodeId([b; 16])
	}

	#[test]
	fn empty_batch_is_empty() {
		let batch = AssignmentBatch::new(TopologyVersion::new(1, 0), 1);
		assert!(batch.is_empty());
		assert_eq!(batch.len(), 0);
	}

	#[test]
	fn with_supplier_skips_empty_partition_sets() {
		let batch = AssignmentBatch::new(TopologyVersion::new(1, 0), 1)
			.with_supplier(node(1), PartitionSet::new());
		assert!(batch.is_empty());
	}

	#[test]
	fn with_supplier_tracks_multiple_suppliers() {
		let mut parts_a = PartitionSet::new();
		parts_a.insert(0);
		parts_a.insert(1);
		let mut parts_b = PartitionSet::new();
		parts_b.insert(2);

		let batch = AssignmentBatch::new(TopologyVersion::new(1, 0), 1)
			.with_supplier(node(1), parts_a)
			.with_supplier(node(2), parts_b);

		assert_eq!(batch.len(), 2);
		let collected: BTreeMap<_, _> = batch.iter().map(|(s, p)| (*s, p.clone())).collect();
		assert_eq!(collected[&node(1)].len(), 2);
		assert_eq!(collected[&node(2)].len(), 1);
	}
}

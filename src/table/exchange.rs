//! The exchange manager: external collaborator (spec.md §1) that produces
//! `AssignmentBatch`es and topology-version stamps. Only the slice the
//! demander/future need to drive retries is modeled here.

use std::collections::BTreeMap;

use shardkv_rpc::layout::PartitionId;

use crate::assignment::SupplierId;

pub trait ExchangeManager: Send + Sync {
	/// True while a topology exchange round is already under way; used by
	/// `Demander::add_assignments` to drop a batch that's obsolete before
	/// it's even acted on.
	fn has_pending_exchange(&self) -> bool;

	/// Ask for an immediate re-exchange covering the whole cache (used by
	/// `RetryTimer` expiry and `Demander::force_preload`).
	fn force_preload_exchange(&self);

	/// Ask for a synthetic exchange round that only needs to re-assign the
	/// given previously-missed partitions (called from
	/// `RebalanceFuture::check_is_done`).
	fn force_dummy_exchange(&self, missed: BTreeMap<SupplierId, std::collections::BTreeSet<PartitionId>>);

	/// Ask for a partitions-map resend without forcing a full topology
	/// round, used when a rebalance round completes cleanly.
	fn schedule_resend_partitions(&self);
}

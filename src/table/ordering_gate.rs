//! `OrderingGate`: enforces a configured rebalance-before dependency across
//! caches (spec.md §4.D). A *customer* cache may reference rows in an
//! *account* cache and must not start requesting its own partitions until
//! the account cache's current rebalance round has finished successfully.

use std::sync::Arc;

use shardkv_rpc::layout::Affinity;

use crate::future::RebalanceFuture;

/// What `OrderingGate` needs from a prerequisite cache: only its current
/// rebalance round's completion future.
pub trait SyncSource: Send + Sync {
	fn sync_future(&self) -> Arc<RebalanceFuture>;
}

pub struct OrderingGate {
	/// Ordered list of (name, prerequisite) pairs; waited on in this order.
	prerequisites: Vec<(String, Arc<dyn SyncSource>)>,
	affinity: Arc<dyn Affinity>,
}

impl OrderingGate {
	pub fn new(affinity: Arc<dyn Affinity>, prerequisites: Vec<(String, Arc<dyn SyncSource>)>) -> Self {
		Self {
			prerequisites,
			affinity,
		}
	}

	/// Waits for every prerequisite cache's current rebalance round to
	/// finish, in configured order. Returns `true` once all are satisfied
	/// and `local` is still tracking the current topology version; returns
	/// `false` (after cancelling `local`) if the topology moved on while
	/// waiting, in which case the caller must stop issuing demand messages
	/// for this round — a fresh one will be constructed against the new
	/// topology version.
	pub async fn wait_for_prerequisites(&self, local: &Arc<RebalanceFuture>) -> bool {
		for (name, prereq) in &self.prerequisites {
			let fut = prereq.sync_future();
			let succeeded = fut.wait().await;
			tracing::debug!(cache = %name, succeeded, "ordering gate: prerequisite settled");

			if !succeeded {
				local.cancel();
				return false;
			}

			if local.topology_version() != Some(self.affinity.topology_version()) {
				local.cancel();
				return false;
			}
		}
		true
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::exchange::ExchangeManager;
	use crate::metrics::RebalanceMetrics;
	use shardkv_rpc::layout::{PartitionId, TopologyVersion};
	use shardkv_util::data::NodeId;
	use std::collections::BTreeMap;

	struct FixedAffinity(TopologyVersion);
	impl Affinity for FixedAffinity {
		fn is_local(&self, _: PartitionId, _: TopologyVersion) -> bool {
			true
		}
		fn primary(&self, _: PartitionId, _: TopologyVersion) -> NodeId {
			NodeId([0; 16])
		}
		fn topology_version(&self) -> TopologyVersion {
			self.0
		}
		fn suppliers(&self, _: PartitionId, _: TopologyVersion) -> Vec<NodeId> {
			vec![]
		}
	}

	struct NoopExchange;
	impl ExchangeManager for NoopExchange {
		fn has_pending_exchange(&self) -> bool {
			false
		}
		fn force_preload_exchange(&self) {}
		fn force_dummy_exchange(&self, _: BTreeMap<NodeId, std::collections::BTreeSet<PartitionId>>) {}
		fn schedule_resend_partitions(&self) {}
	}

	struct FixedSource(Arc<RebalanceFuture>);
	impl SyncSource for FixedSource {
		fn sync_future(&self) -> Arc<RebalanceFuture> {
			self.0.clone()
		}
	}

	fn future_at(tv: TopologyVersion) -> Arc<RebalanceFuture> {
		RebalanceFuture::new(
			1,
			Some(tv),
			1,
			true,
			Arc::new(FixedAffinity(tv)),
			Arc::new(NoopExchange),
			Arc::new(RebalanceMetrics::new("ordering-gate-test")),
		)
	}

	#[tokio::test]
	async fn proceeds_once_every_prerequisite_succeeds() {
		let tv = TopologyVersion::new(1, 0);
		let account_future = future_at(tv);
		account_future.done_if_empty();

		let local = future_at(tv);
		let affinity = Arc::new(FixedAffinity(tv));
		let gate = OrderingGate::new(
			affinity,
			vec![("accounts".to_string(), Arc::new(FixedSource(account_future)))],
		);

		assert!(gate.wait_for_prerequisites(&local).await);
	}

	#[tokio::test]
	async fn cancels_local_future_when_topology_moved_on() {
		let tv = TopologyVersion::new(1, 0);
		let account_future = future_at(tv);
		account_future.done_if_empty();

		let local = future_at(tv);
		// Affinity has already advanced past the local future's version.
		let affinity = Arc::new(FixedAffinity(TopologyVersion::new(2, 0)));
		let gate = OrderingGate::new(
			affinity,
			vec![("accounts".to_string(), Arc::new(FixedSource(account_future)))],
		);

		assert!(!gate.wait_for_prerequisites(&local).await);
		assert_eq!(local.state(), crate::future::FutureState::Cancelled);
	}

	#[tokio::test]
	async fn cancels_local_future_without_sending_when_prerequisite_fails() {
		let tv = TopologyVersion::new(1, 0);
		let account_future = future_at(tv);
		account_future.resolve(false);

		let local = future_at(tv);
		let affinity = Arc::new(FixedAffinity(tv));
		let gate = OrderingGate::new(
			affinity,
			vec![("accounts".to_string(), Arc::new(FixedSource(account_future)))],
		);

		assert!(!gate.wait_for_prerequisites(&local).await);
		assert_eq!(local.state(), crate::future::FutureState::Cancelled);
	}
}

//! `RebalanceFuture`: the per-attempt completion object. One is created for
//! every `AssignmentBatch` the `Demander` accepts; it tracks, per supplier,
//! which partitions are still outstanding, and is the single place where a
//! rebalance round's success/failure is decided.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Notify;
use tracing::{debug, info};

use shardkv_rpc::layout::{Affinity, PartitionId, TopologyVersion};
use shardkv_util::data::UpdateSeq;

use crate::assignment::{ExchangeId, PartitionSet, SupplierId};
use crate::exchange::ExchangeManager;
use crate::metrics::RebalanceMetrics;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FutureState {
	Active,
	Cancelled,
	SucceededTrue,
	SucceededFalse,
}

struct SupplierProgress {
	#[allow(dead_code)]
	start: Instant,
	remaining: PartitionSet,
}

struct Inner {
	state: FutureState,
	remaining: BTreeMap<SupplierId, SupplierProgress>,
	missed: BTreeMap<SupplierId, PartitionSet>,
	listeners: Vec<Box<dyn FnOnce(bool) + Send>>,
}

/// Per-attempt completion tracker. See module docs; the field names follow
/// spec.md §3 verbatim (`updateSeq`, `topologyVersion`, `exchangeRef`,
/// `remaining`, `missed`).
pub struct RebalanceFuture {
	update_seq: UpdateSeq,
	/// `None` only for the dummy/initial future (`topologyVersion = ⊥`).
	topology_version: Option<TopologyVersion>,
	#[allow(dead_code)]
	exchange_id: ExchangeId,
	send_stopped_event: bool,
	inner: Mutex<Inner>,
	notify: Notify,
	affinity: Arc<dyn Affinity>,
	exchange: Arc<dyn ExchangeManager>,
	metrics: Arc<RebalanceMetrics>,
	created_at: Instant,
}

impl RebalanceFuture {
	pub fn new(
		update_seq: UpdateSeq,
		topology_version: Option<TopologyVersion>,
		exchange_id: ExchangeId,
		send_stopped_event: bool,
		affinity: Arc<dyn Affinity>,
		exchange: Arc<dyn ExchangeManager>,
		metrics: Arc<RebalanceMetrics>,
	) -> Arc<Self> {
		Arc::new(Self {
			update_seq,
			topology_version,
			exchange_id,
			send_stopped_event,
			inner: Mutex::new(Inner {
				state: FutureState::Active,
				remaining: BTreeMap::new(),
				missed: BTreeMap::new(),
				listeners: Vec::new(),
			}),
			notify: Notify::new(),
			affinity,
			exchange,
			metrics,
			created_at: Instant::now(),
		})
	}

	pub fn update_seq(&self) -> UpdateSeq {
		self.update_seq
	}

	pub fn topology_version(&self) -> Option<TopologyVersion> {
		self.topology_version
	}

	pub fn is_initial(&self) -> bool {
		self.topology_version.is_none()
	}

	pub fn is_actual(&self, seq: UpdateSeq) -> bool {
		seq == self.update_seq
	}

	pub fn is_done(&self) -> bool {
		self.inner.lock().unwrap().state != FutureState::Active
	}

	pub fn state(&self) -> FutureState {
		self.inner.lock().unwrap().state
	}

	/// Registers expected partitions for `supplier`. Must be called before
	/// any `partition_done(supplier, _)` for that supplier.
	pub fn append_partitions(&self, supplier: SupplierId, parts: PartitionSet) {
		if parts.is_empty() {
			return;
		}
		let mut inner = self.inner.lock().unwrap();
		if inner.state != FutureState::Active {
			return;
		}
		inner.remaining.insert(
			supplier,
			SupplierProgress {
				start: Instant::now(),
				remaining: parts,
			},
		);
	}

	/// If `remaining` is empty at registration time (vacuous assignment),
	/// complete successfully right away.
	pub fn done_if_empty(&self) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state == FutureState::Active && inner.remaining.is_empty() {
			let (success, listeners) = self.check_is_done(&mut inner);
			drop(inner);
			self.fire(success, listeners);
		}
	}

	pub fn partition_done(&self, supplier: SupplierId, p: PartitionId) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state != FutureState::Active {
			return;
		}
		let mut supplier_finished = false;
		if let Some(progress) = inner.remaining.get_mut(&supplier) {
			progress.remaining.remove(&p);
			if progress.remaining.is_empty() {
				supplier_finished = true;
			}
		}
		if supplier_finished {
			inner.remaining.remove(&supplier);
			self.metrics.partitions_completed.add(1, &[]);
			debug!("rebalance: partition {} done from supplier {:?}", p, supplier);
		}
		if inner.remaining.is_empty() {
			let (success, listeners) = self.check_is_done(&mut inner);
			drop(inner);
			self.fire(success, listeners);
		}
	}

	/// Records `p` as missed for `supplier`; does not remove it from
	/// `remaining` — the caller follows with `partition_done` once it has
	/// finished accounting for the round.
	pub fn partition_missed(&self, supplier: SupplierId, p: PartitionId) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state != FutureState::Active {
			return;
		}
		inner.missed.entry(supplier).or_insert_with(PartitionSet::new).insert(p);
		self.metrics.partitions_missed.add(1, &[]);
	}

	/// Cancels the whole future: whatever is still outstanding across every
	/// supplier is folded into `missed`, then the future transitions
	/// directly to `Cancelled` (it does not re-enter the success/failure
	/// branch of `check_is_done`, since there is no more exchange work for
	/// this attempt to continue). Idempotent once terminal.
	pub fn cancel(&self) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state != FutureState::Active {
			return;
		}
		let remaining = std::mem::take(&mut inner.remaining);
		for (supplier, progress) in remaining {
			inner
				.missed
				.entry(supplier)
				.or_insert_with(PartitionSet::new)
				.extend(progress.remaining);
		}
		inner.state = FutureState::Cancelled;
		self.emit_stopped();
		self.maybe_force_dummy_exchange(&inner.missed);
		let listeners = std::mem::take(&mut inner.listeners);
		drop(inner);
		self.fire(false, listeners);
	}

	/// Cancels only `supplier`'s share: its outstanding partitions become
	/// missed and it is dropped from `remaining`. If other suppliers are
	/// still in flight the future stays `Active`; the overall round only
	/// reaches a terminal state once `remaining` is globally empty, via the
	/// normal `check_is_done` success/failure branch (see scenario where a
	/// supplier disconnects mid-transfer but siblings complete normally).
	pub fn cancel_supplier(&self, supplier: SupplierId) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state != FutureState::Active {
			return;
		}
		if let Some(progress) = inner.remaining.remove(&supplier) {
			inner
				.missed
				.entry(supplier)
				.or_insert_with(PartitionSet::new)
				.extend(progress.remaining);
		}
		if inner.remaining.is_empty() {
			let (success, listeners) = self.check_is_done(&mut inner);
			drop(inner);
			self.fire(success, listeners);
		}
	}

	/// Directly resolves the future without consulting affinity/exchange.
	/// Used only to chain the dummy/initial future's result to the first
	/// real future constructed for this demander (see DESIGN.md's Open
	/// Question resolution for the dummy future).
	pub fn resolve(&self, success: bool) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state != FutureState::Active {
			return;
		}
		inner.state = if success {
			FutureState::SucceededTrue
		} else {
			FutureState::SucceededFalse
		};
		let listeners = std::mem::take(&mut inner.listeners);
		drop(inner);
		self.fire(success, listeners);
	}

	/// `check_is_done` policy (spec.md §4.B): called whenever `remaining`
	/// becomes empty, with the lock still held. Decides the terminal state,
	/// drains the listener list, and returns it along with the outcome; the
	/// caller drops the guard before invoking `fire` so no listener can
	/// observe this mutex still held by its own completion.
	fn check_is_done(&self, inner: &mut Inner) -> (bool, Vec<Box<dyn FnOnce(bool) + Send>>) {
		self.emit_stopped();

		let current = self.affinity.topology_version();
		let topology_matches = self.topology_version == Some(current);

		let success = if topology_matches {
			if !inner.missed.is_empty() {
				self.maybe_force_dummy_exchange(&inner.missed);
				false
			} else {
				self.exchange.schedule_resend_partitions();
				true
			}
		} else {
			// Affinity has moved on: a newer future will take over.
			true
		};

		inner.state = if success {
			FutureState::SucceededTrue
		} else {
			FutureState::SucceededFalse
		};
		(success, std::mem::take(&mut inner.listeners))
	}

	fn maybe_force_dummy_exchange(&self, missed: &BTreeMap<SupplierId, PartitionSet>) {
		if !missed.is_empty() {
			self.exchange.force_dummy_exchange(missed.clone());
		}
	}

	fn emit_stopped(&self) {
		if self.send_stopped_event {
			self.metrics
				.rebalance_duration
				.record(self.created_at.elapsed().as_secs_f64(), &[]);
			info!(
				update_seq = self.update_seq,
				"rebalance round stopped"
			);
		}
	}

	/// Runs listeners and wakes async waiters. Must be called with the
	/// future's mutex already released.
	fn fire(&self, success: bool, listeners: Vec<Box<dyn FnOnce(bool) + Send>>) {
		for f in listeners {
			f(success);
		}
		self.notify.notify_waiters();
	}

	/// Registers a continuation invoked once with the final boolean result.
	/// If the future is already terminal, invokes it immediately.
	pub fn listen<F: FnOnce(bool) + Send + 'static>(&self, f: F) {
		let mut inner = self.inner.lock().unwrap();
		match inner.state {
			FutureState::Active => inner.listeners.push(Box::new(f)),
			FutureState::Cancelled | FutureState::SucceededFalse => {
				drop(inner);
				f(false);
			}
			FutureState::SucceededTrue => {
				drop(inner);
				f(true);
			}
		}
	}

	/// Awaits the future's terminal result. `Cancelled` is reported as
	/// `false` to callers blocking on `sync_future()`.
	pub async fn wait(self: &Arc<Self>) -> bool {
		loop {
			{
				let inner = self.inner.lock().unwrap();
				match inner.state {
					FutureState::Active => {}
					FutureState::SucceededTrue => return true,
					FutureState::Cancelled | FutureState::SucceededFalse => return false,
				}
			}
			self.notify.notified().await;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use shardkv_util::data::NodeId;
	use std::sync::atomic::{AtomicBool, Ordering};

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

	#[derive(Default)]
	struct RecordingExchange {
		dummy_forced: std::sync::Mutex<bool>,
		resend_scheduled: std::sync::Mutex<bool>,
	}
	impl ExchangeManager for RecordingExchange {
		fn has_pending_exchange(&self) -> bool {
			false
		}
		fn force_preload_exchange(&self) {}
		fn force_dummy_exchange(&self, _missed: BTreeMap<SupplierId, BTreeSet<PartitionId>>) {
			*self.dummy_forced.lock().unwrap() = true;
		}
		fn schedule_resend_partitions(&self) {
			*self.resend_scheduled.lock().unwrap() = true;
		}
	}

	fn node(b: u8) -> NodeId {
		NodeId([b; 16])
	}

	fn make_future(
		tv: TopologyVersion,
		exchange: Arc<RecordingExchange>,
	) -> Arc<RebalanceFuture> {
		let affinity = Arc::new(FixedAffinity(tv));
		let metrics = Arc::new(RebalanceMetrics::new("test"));
		RebalanceFuture::new(1, Some(tv), 1, true, affinity, exchange, metrics)
	}

	#[tokio::test]
	async fn empty_assignment_succeeds_immediately() {
		let exchange = Arc::new(RecordingExchange::default());
		let fut = make_future(TopologyVersion::new(1, 0), exchange.clone());
		fut.done_if_empty();
		assert!(fut.wait().await);
		assert!(*exchange.resend_scheduled.lock().unwrap());
	}

	#[tokio::test]
	async fn missed_partition_resolves_false_and_forces_dummy_exchange() {
		let exchange = Arc::new(RecordingExchange::default());
		let fut = make_future(TopologyVersion::new(1, 0), exchange.clone());
		let mut parts = PartitionSet::new();
		parts.insert(0);
		parts.insert(1);
		fut.append_partitions(node(1), parts);
		fut.partition_missed(node(1), 1);
		fut.partition_done(node(1), 0);
		fut.partition_done(node(1), 1);

		assert!(!fut.wait().await);
		assert!(*exchange.dummy_forced.lock().unwrap());
	}

	#[tokio::test]
	async fn stale_topology_resolves_true_without_forcing_dummy_exchange() {
		let exchange = Arc::new(RecordingExchange::default());
		let fut = make_future(TopologyVersion::new(1, 0), exchange.clone());
		let mut parts = PartitionSet::new();
		parts.insert(0);
		fut.append_partitions(node(1), parts);

		// Simulate topology having moved on by constructing the future
		// against a stale version directly.
		let moved_on = Arc::new(FixedAffinity(TopologyVersion::new(2, 0)));
		let fut2 = RebalanceFuture::new(
			2,
			Some(TopologyVersion::new(1, 0)),
			1,
			true,
			moved_on,
			exchange.clone(),
			Arc::new(RebalanceMetrics::new("test2")),
		);
		let mut parts2 = PartitionSet::new();
		parts2.insert(0);
		fut2.append_partitions(node(1), parts2);
		fut2.partition_done(node(1), 0);

		assert!(fut2.wait().await);
		assert!(!*exchange.dummy_forced.lock().unwrap());

		// first future still pending, unrelated to the assertion above
		let _ = fut;
	}

	#[tokio::test]
	async fn cancel_is_idempotent() {
		let exchange = Arc::new(RecordingExchange::default());
		let fut = make_future(TopologyVersion::new(1, 0), exchange);
		let mut parts = PartitionSet::new();
		parts.insert(0);
		fut.append_partitions(node(1), parts);
		fut.cancel();
		fut.cancel();
		assert_eq!(fut.state(), FutureState::Cancelled);
		assert!(!fut.wait().await);
	}

	#[tokio::test]
	async fn cancel_supplier_lets_other_suppliers_finish() {
		let exchange = Arc::new(RecordingExchange::default());
		let fut = make_future(TopologyVersion::new(1, 0), exchange.clone());
		let mut parts_a = PartitionSet::new();
		parts_a.insert(0);
		parts_a.insert(1);
		let mut parts_b = PartitionSet::new();
		parts_b.insert(2);
		fut.append_partitions(node(1), parts_a);
		fut.append_partitions(node(2), parts_b);

		// N1 disconnects after delivering partition 0.
		fut.partition_done(node(1), 0);
		fut.cancel_supplier(node(1));
		assert!(!fut.is_done());

		// N2 completes normally.
		fut.partition_done(node(2), 2);

		assert!(!fut.wait().await);
		assert!(*exchange.dummy_forced.lock().unwrap());
	}

	#[tokio::test]
	async fn listen_on_already_terminal_future_fires_immediately() {
		let exchange = Arc::new(RecordingExchange::default());
		let fut = make_future(TopologyVersion::new(1, 0), exchange);
		fut.resolve(true);

		let fired = Arc::new(AtomicBool::new(false));
		let fired2 = fired.clone();
		fut.listen(move |success| {
			fired2.store(success, Ordering::SeqCst);
		});
		assert!(fired.load(Ordering::SeqCst));
	}
}

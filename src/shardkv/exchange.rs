//! `CacheExchange`/`ExchangeWorker`: the concrete exchange layer SPEC_FULL
//! §1 asks for so the demander can be exercised end-to-end. Watches the
//! cluster layout for membership changes and turns them into
//! `AssignmentBatch`es for one cache's `Demander`; narrows to just the
//! reported partitions on a forced dummy re-exchange.
//!
//! Split into two halves because `ExchangeManager` is called synchronously
//! from inside `RebalanceFuture`/`Demander` (which only hold
//! `Arc<dyn ExchangeManager>`), while the actual recomputation needs
//! exclusive, schedulable state: `CacheExchange` is the thin, shareable
//! handle; `ExchangeWorker` is the `Worker` that owns the event queue and
//! runs on the background runner, the same split `table/sync.rs`'s
//! `SyncWorker` makes between the long-lived `ReplicaSyncer` and its worker
//! loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use shardkv_rpc::layout::Affinity;
use shardkv_rpc::system::System;
use shardkv_table::assignment::{AssignmentBatch, PartitionSet, SupplierId};
use shardkv_table::demander::Demander;
use shardkv_table::exchange::ExchangeManager;
use shardkv_table::partition::{InMemoryPartitionStore, PartitionStore, PartitionTransferState};
use shardkv_util::background::worker::{Worker, WorkerStatus};
use shardkv_util::error::Error;

enum ExchangeEvent {
	Full,
	Dummy(BTreeMap<SupplierId, PartitionSet>),
}

/// The `ExchangeManager` side: cheap to clone into `Demander`/`RebalanceFuture`,
/// only ever pushes events onto `ExchangeWorker`'s queue.
pub struct CacheExchange {
	pending: AtomicBool,
	trigger: mpsc::UnboundedSender<ExchangeEvent>,
}

impl ExchangeManager for CacheExchange {
	fn has_pending_exchange(&self) -> bool {
		self.pending.load(Ordering::SeqCst)
	}

	fn force_preload_exchange(&self) {
		let _ = self.trigger.send(ExchangeEvent::Full);
	}

	fn force_dummy_exchange(&self, missed: BTreeMap<SupplierId, PartitionSet>) {
		let _ = self.trigger.send(ExchangeEvent::Dummy(missed));
	}

	fn schedule_resend_partitions(&self) {
		let _ = self.trigger.send(ExchangeEvent::Full);
	}
}

/// The `Worker` side: recomputes assignments and drives them into the
/// `Demander` it is bound to.
pub struct ExchangeWorker {
	system: Arc<System>,
	store: Arc<InMemoryPartitionStore>,
	partition_count: u16,
	cache_name: &'static str,
	exchange: Arc<CacheExchange>,
	demander: ArcSwapOption<Demander<InMemoryPartitionStore>>,
	events: mpsc::UnboundedReceiver<ExchangeEvent>,
	/// An event already taken out of `events` by `wait_for_work`, waiting for
	/// the next `work()` call to fold it in alongside anything else pending.
	pending_event: Option<ExchangeEvent>,
	next_exchange_id: AtomicU64,
}

impl ExchangeWorker {
	pub fn new(
		system: Arc<System>,
		store: Arc<InMemoryPartitionStore>,
		partition_count: u16,
		cache_name: &'static str,
	) -> (Arc<CacheExchange>, Self) {
		let (trigger, events) = mpsc::unbounded_channel();
		let exchange = Arc::new(CacheExchange {
			pending: AtomicBool::new(false),
			trigger,
		});
		let worker = Self {
			system,
			store,
			partition_count,
			cache_name,
			exchange: exchange.clone(),
			demander: ArcSwapOption::empty(),
			events,
			pending_event: None,
			next_exchange_id: AtomicU64::new(1),
		};
		(exchange, worker)
	}

	/// Wires the demander this worker feeds. Must be called once, before the
	/// worker is handed to the background runner.
	pub fn bind(&self, demander: Arc<Demander<InMemoryPartitionStore>>) {
		self.demander.store(Some(demander));
	}

	/// Scans every partition in this cache and assigns to the first
	/// supplier, in affinity order, each one this node should own but
	/// doesn't yet. When `only` is set (a forced dummy re-exchange), skips
	/// every partition not named in it.
	fn compute_batch(&self, only: Option<&BTreeMap<SupplierId, PartitionSet>>) -> AssignmentBatch {
		let layout = self.system.cluster_layout();
		let exchange_id = self.next_exchange_id.fetch_add(1, Ordering::Relaxed);
		let mut by_supplier: BTreeMap<SupplierId, PartitionSet> = BTreeMap::new();

		for p in 0..self.partition_count {
			if let Some(only) = only {
				if !only.values().any(|parts| parts.contains(&p)) {
					continue;
				}
			}
			if !self.system.layout().is_local(p, layout.version) {
				continue;
			}
			if self.store.state(p) == PartitionTransferState::Owning {
				continue;
			}
			let suppliers = self.system.layout().suppliers(p, layout.version);
			let supplier = match suppliers.into_iter().next() {
				Some(s) => s,
				None => continue,
			};
			self.store.set_state(p, PartitionTransferState::Moving);
			by_supplier.entry(supplier).or_insert_with(PartitionSet::new).insert(p);
		}

		let mut batch = AssignmentBatch::new(layout.version, exchange_id);
		for (supplier, partitions) in by_supplier {
			batch = batch.with_supplier(supplier, partitions);
		}
		batch
	}

	async fn run_round(&self, only: Option<BTreeMap<SupplierId, PartitionSet>>, force: bool) {
		self.exchange.pending.store(true, Ordering::SeqCst);
		let batch = self.compute_batch(only.as_ref());
		debug!(cache = self.cache_name, partitions = batch.len(), "exchange round computed assignment");
		if let Some(demander) = self.demander.load_full() {
			if let Some(fut) = demander.add_assignments(batch, force).await {
				fut.await;
			}
		}
		self.exchange.pending.store(false, Ordering::SeqCst);
	}
}

#[async_trait]
impl Worker for ExchangeWorker {
	fn name(&self) -> String {
		format!("exchange/{}", self.cache_name)
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus, Error> {
		let mut events = Vec::new();
		if let Some(event) = self.pending_event.take() {
			events.push(event);
		}
		while let Ok(event) = self.events.try_recv() {
			events.push(event);
		}

		// No event at all (the worker's very first run, or a spurious
		// layout-change wakeup) still gets a full round, so the cache's
		// initial assignment gets computed. A mix that includes any `Full`
		// event also widens to a full round; only an all-`Dummy` batch
		// narrows the recompute to the reported partitions.
		let only = if !events.is_empty() && events.iter().all(|e| matches!(e, ExchangeEvent::Dummy(_))) {
			let mut merged = BTreeMap::new();
			for event in events {
				if let ExchangeEvent::Dummy(missed) = event {
					for (supplier, parts) in missed {
						merged.entry(supplier).or_insert_with(PartitionSet::new).extend(parts);
					}
				}
			}
			Some(merged)
		} else {
			None
		};

		self.run_round(only, true).await;
		Ok(WorkerStatus::Idle)
	}

	async fn wait_for_work(&mut self, must_exit: &mut watch::Receiver<bool>) -> WorkerStatus {
		tokio::select! {
			_ = self.system.layout_notify().notified() => WorkerStatus::Busy,
			event = self.events.recv() => {
				match event {
					Some(event) => {
						self.pending_event = Some(event);
						WorkerStatus::Busy
					}
					None => WorkerStatus::Done,
				}
			}
			_ = must_exit.changed() => {
				if *must_exit.borrow() {
					WorkerStatus::Done
				} else {
					WorkerStatus::Idle
				}
			}
		}
	}
}

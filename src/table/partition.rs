//! The local partition store: an external collaborator per spec.md §1.
//! `InMemoryPartitionStore` is a minimal reference implementation good
//! enough to drive the demander end-to-end in tests and in the example
//! binary; a production node would back this with `shardkv_db` trees.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use shardkv_rpc::layout::PartitionId;
use shardkv_util::error::Error;

use crate::sync::ReplicaSource;

/// Lifecycle state of a locally-held partition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PartitionTransferState {
	/// Rebalancing is actively moving data in; writes from the demander are
	/// accepted, reads are not yet considered authoritative.
	Moving,
	/// The partition is fully transferred and locally authoritative.
	Owning,
	/// The partition is being handed off to another node (supplier side;
	/// the core never writes this state, only reads past it).
	Renting,
	/// The partition has been dropped from this node.
	Evicted,
}

/// A single preloaded key/value entry as carried in a supply message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreloadEntry {
	pub key: Vec<u8>,
	pub value: Vec<u8>,
	pub version: u64,
	pub ttl: Option<u64>,
	pub expire_time: Option<u64>,
}

/// Held while an entry is being applied; prevents the partition from being
/// evicted out from under the demander. Released on drop.
pub struct ReservationGuard<'a> {
	store: &'a InMemoryPartitionStore,
	partition: PartitionId,
}

impl<'a> Drop for ReservationGuard<'a> {
	fn drop(&mut self) {
		let mut reserved = self.store.reserved.lock().unwrap();
		if let Some(count) = reserved.get_mut(&self.partition) {
			*count = count.saturating_sub(1);
		}
	}
}

/// Held for the duration of a single batch's worth of entry application.
pub struct LockGuard<'a> {
	_guard: std::sync::MutexGuard<'a, ()>,
}

/// What the demander needs from the local partition store (spec.md §1, §6).
pub trait PartitionStore: Send + Sync {
	fn state(&self, partition: PartitionId) -> PartitionTransferState;
	fn reserve(&self, partition: PartitionId) -> ReservationGuard<'_>;
	fn lock(&self, partition: PartitionId) -> LockGuard<'_>;
	fn preloading_permitted(&self, partition: PartitionId, key: &[u8], version: u64) -> bool;
	fn initial_value(&self, partition: PartitionId, entry: PreloadEntry) -> Result<bool, Error>;
	fn own(&self, partition: PartitionId) -> Result<bool, Error>;
}

/// Reference `PartitionStore`: keeps everything in a few `HashMap`s behind
/// locks. Good enough to exercise the demander's algorithm; not meant to
/// survive a restart.
pub struct InMemoryPartitionStore {
	states: RwLock<HashMap<PartitionId, PartitionTransferState>>,
	data: Mutex<HashMap<PartitionId, HashMap<Vec<u8>, (Vec<u8>, u64)>>>,
	reserved: Mutex<HashMap<PartitionId, u32>>,
	locks: HashMap<PartitionId, Mutex<()>>,
}

impl InMemoryPartitionStore {
	/// Create a store where every partition in `moving` starts in the
	/// `Moving` state, ready to receive a transfer; all others are absent
	/// (treated as `Evicted` until assigned).
	pub fn new(moving: impl IntoIterator<Item = PartitionId>) -> Self {
		let mut states = HashMap::new();
		let mut locks = HashMap::new();
		for p in moving {
			states.insert(p, PartitionTransferState::Moving);
			locks.insert(p, Mutex::new(()));
		}
		Self {
			states: RwLock::new(states),
			data: Mutex::new(HashMap::new()),
			reserved: Mutex::new(HashMap::new()),
			locks,
		}
	}

	pub fn set_state(&self, partition: PartitionId, state: PartitionTransferState) {
		self.states.write().unwrap().insert(partition, state);
	}

	pub fn get(&self, partition: PartitionId, key: &[u8]) -> Option<(Vec<u8>, u64)> {
		self.data
			.lock()
			.unwrap()
			.get(&partition)
			.and_then(|m| m.get(key))
			.cloned()
	}

	pub fn len(&self, partition: PartitionId) -> usize {
		self.data
			.lock()
			.unwrap()
			.get(&partition)
			.map(|m| m.len())
			.unwrap_or(0)
	}
}

impl PartitionStore for InMemoryPartitionStore {
	fn state(&self, partition: PartitionId) -> PartitionTransferState {
		self.states
			.read()
			.unwrap()
			.get(&partition)
			.copied()
			.unwrap_or(PartitionTransferState::Evicted)
	}

	fn reserve(&self, partition: PartitionId) -> ReservationGuard<'_> {
		*self.reserved.lock().unwrap().entry(partition).or_insert(0) += 1;
		ReservationGuard {
			store: self,
			partition,
		}
	}

	fn lock(&self, partition: PartitionId) -> LockGuard<'_> {
		let guard = self
			.locks
			.get(&partition)
			.expect("lock() called on a partition never declared to the store")
			.lock()
			.unwrap();
		LockGuard { _guard: guard }
	}

	fn preloading_permitted(&self, partition: PartitionId, key: &[u8], version: u64) -> bool {
		match self.get(partition, key) {
			Some((_, existing_version)) => version > existing_version,
			None => true,
		}
	}

	fn initial_value(&self, partition: PartitionId, entry: PreloadEntry) -> Result<bool, Error> {
		let mut data = self.data.lock().unwrap();
		let table = data.entry(partition).or_insert_with(HashMap::new);
		match table.get(&entry.key) {
			Some((_, v)) if *v >= entry.version => Ok(false),
			_ => {
				table.insert(entry.key, (entry.value, entry.version));
				Ok(true)
			}
		}
	}

	fn own(&self, partition: PartitionId) -> Result<bool, Error> {
		self.states
			.write()
			.unwrap()
			.insert(partition, PartitionTransferState::Owning);
		Ok(true)
	}
}

impl ReplicaSource for InMemoryPartitionStore {
	fn owned_partitions(&self) -> Vec<PartitionId> {
		self.states
			.read()
			.unwrap()
			.iter()
			.filter_map(|(partition, state)| (*state == PartitionTransferState::Owning).then(|| *partition))
			.collect()
	}

	fn snapshot(&self, partition: PartitionId) -> Vec<(Vec<u8>, Vec<u8>)> {
		let mut items: Vec<(Vec<u8>, Vec<u8>)> = self
			.data
			.lock()
			.unwrap()
			.get(&partition)
			.map(|table| table.iter().map(|(k, (v, _))| (k.clone(), v.clone())).collect())
			.unwrap_or_default();
		items.sort_by(|a, b| a.0.cmp(&b.0));
		items
	}

	fn merge_items(&self, partition: PartitionId, items: Vec<(Vec<u8>, Vec<u8>)>) {
		let mut data = self.data.lock().unwrap();
		let table = data.entry(partition).or_insert_with(HashMap::new);
		for (key, value) in items {
			let version = table.get(&key).map(|(_, v)| *v).unwrap_or(0);
			table.insert(key, (value, version));
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn entry(key: &[u8], value: &[u8], version: u64) -> PreloadEntry {
		PreloadEntry {
			key: key.to_vec(),
			value: value.to_vec(),
			version,
			ttl: None,
			expire_time: None,
		}
	}

	#[test]
	fn fresh_partitions_start_evicted_unless_declared_moving() {
		let store = InMemoryPartitionStore::new([0, 1]);
		assert_eq!(store.state(0), PartitionTransferState::Moving);
		assert_eq!(store.state(2), PartitionTransferState::Evicted);
	}

	#[test]
	fn initial_value_applies_once_and_rejects_non_newer_versions() {
		let store = InMemoryPartitionStore::new([0]);
		assert!(store.preloading_permitted(0, b"k", 1));

		assert_eq!(store.initial_value(0, entry(b"k", b"v1", 1)).unwrap(), true);
		assert_eq!(store.get(0, b"k"), Some((b"v1".to_vec(), 1)));

		// Same version again: rejected by preloading_permitted before the
		// store is even touched, and initial_value itself is idempotent too.
		assert!(!store.preloading_permitted(0, b"k", 1));
		assert_eq!(store.initial_value(0, entry(b"k", b"v1", 1)).unwrap(), false);
		assert_eq!(store.get(0, b"k"), Some((b"v1".to_vec(), 1)));

		// A strictly newer version is accepted and overwrites.
		assert!(store.preloading_permitted(0, b"k", 2));
		assert_eq!(store.initial_value(0, entry(b"k", b"v2", 2)).unwrap(), true);
		assert_eq!(store.get(0, b"k"), Some((b"v2".to_vec(), 2)));
	}

	#[test]
	fn own_transitions_partition_to_owning() {
		let store = InMemoryPartitionStore::new([0]);
		assert_eq!(store.state(0), PartitionTransferState::Moving);
		store.own(0).unwrap();
		assert_eq!(store.state(0), PartitionTransferState::Owning);
	}

	#[test]
	fn reservation_guard_decrements_on_drop() {
		let store = InMemoryPartitionStore::new([0]);
		{
			let _a = store.reserve(0);
			let _b = store.reserve(0);
			assert_eq!(*store.reserved.lock().unwrap().get(&0).unwrap(), 2);
		}
		assert_eq!(*store.reserved.lock().unwrap().get(&0).unwrap(), 0);
	}

	#[test]
	fn snapshot_is_sorted_and_reflects_merge_items() {
		let store = InMemoryPartitionStore::new([0]);
		store.merge_items(0, vec![(b"b".to_vec(), b"2".to_vec()), (b"a".to_vec(), b"1".to_vec())]);
		assert_eq!(
			store.snapshot(0),
			vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
		);
		assert_eq!(store.owned_partitions(), Vec::<PartitionId>::new());
		store.own(0).unwrap();
		assert_eq!(store.owned_partitions(), vec![0]);
	}
}

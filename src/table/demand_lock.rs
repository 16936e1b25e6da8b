//! `DemandLock`: a per-cache read/write lock between the demand cycle and
//! external collaborators that need rebalancing quiesced (state dump, cache
//! shutdown). The demand cycle takes the read side only around applying one
//! batch of entries, not for the whole rebalance round — an external writer
//! only has to wait out the in-flight batch, not the full future.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct DemandLock {
	lock: RwLock<()>,
}

/// Held for the duration of a single demand batch's entry application.
pub struct DemandGuard<'a>(#[allow(dead_code)] RwLockReadGuard<'a, ()>);

/// Held by an external collaborator to quiesce rebalancing entirely.
pub struct QuiesceGuard<'a>(#[allow(dead_code)] RwLockWriteGuard<'a, ()>);

impl DemandLock {
	pub fn new() -> Self {
		Self {
			lock: RwLock::new(()),
		}
	}

	pub async fn acquire_for_demand(&self) -> DemandGuard<'_> {
		DemandGuard(self.lock.read().await)
	}

	pub async fn quiesce(&self) -> QuiesceGuard<'_> {
		QuiesceGuard(self.lock.write().await)
	}
}

impl Default for DemandLock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::Arc;
	use std::time::Duration;

	#[tokio::test]
	async fn quiesce_waits_out_an_in_flight_demand_batch() {
		let lock = Arc::new(DemandLock::new());

		let demand_guard = lock.acquire_for_demand().await;
		let lock2 = lock.clone();
		let quiesced = tokio::spawn(async move {
			let _guard = lock2.quiesce().await;
		});

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!quiesced.is_finished());

		drop(demand_guard);
		quiesced.await.unwrap();
	}

	#[tokio::test]
	async fn multiple_demand_batches_can_run_concurrently() {
		let lock = DemandLock::new();
		let g1 = lock.acquire_for_demand().await;
		let g2 = lock.acquire_for_demand().await;
		drop(g1);
		drop(g2);
	}
}

//! `RetryTimer`: a single-slot, cancellable delay. Setting a new timer
//! replaces whatever was previously scheduled; the replaced timer's action
//! never runs. Used by the demander to schedule a `forcePreload()` retry
//! after a missed-partition round, per spec.md §4.E.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct RetryTimer {
	slot: Mutex<Option<JoinHandle<()>>>,
}

impl RetryTimer {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			slot: Mutex::new(None),
		})
	}

	/// Schedules `action` to run after `delay`, cancelling whatever was
	/// previously scheduled on this timer.
	pub async fn set<F>(&self, delay: Duration, action: F)
	where
		F: std::future::Future<Output = ()> + Send + 'static,
	{
		let mut slot = self.slot.lock().await;
		if let Some(previous) = slot.take() {
			previous.abort();
		}
		*slot = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			action.await;
		}));
	}

	/// Removes any pending timer without running its action.
	pub async fn cancel(&self) {
		let mut slot = self.slot.lock().await;
		if let Some(previous) = slot.take() {
			previous.abort();
		}
	}

	pub async fn is_pending(&self) -> bool {
		self.slot.lock().await.is_some()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn fires_after_delay() {
		let timer = RetryTimer::new();
		let fired = Arc::new(AtomicU32::new(0));
		let fired2 = fired.clone();
		timer
			.set(Duration::from_millis(10), async move {
				fired2.fetch_add(1, Ordering::SeqCst);
			})
			.await;
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn setting_again_cancels_the_previous_action() {
		let timer = RetryTimer::new();
		let fired = Arc::new(AtomicU32::new(0));

		let fired_first = fired.clone();
		timer
			.set(Duration::from_millis(50), async move {
				fired_first.fetch_add(1, Ordering::SeqCst);
			})
			.await;

		let fired_second = fired.clone();
		timer
			.set(Duration::from_millis(10), async move {
				fired_second.fetch_add(10, Ordering::SeqCst);
			})
			.await;

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 10);
	}

	#[tokio::test]
	async fn cancel_prevents_the_action_from_running() {
		let timer = RetryTimer::new();
		let fired = Arc::new(AtomicU32::new(0));
		let fired2 = fired.clone();
		timer
			.set(Duration::from_millis(10), async move {
				fired2.fetch_add(1, Ordering::SeqCst);
			})
			.await;
		timer.cancel().await;
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}
}

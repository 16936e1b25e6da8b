//! Millisecond-resolution wall clock helpers, used for update sequence
//! numbers and rebalance timing.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("clock went backwards")
		.as_millis() as u64
}

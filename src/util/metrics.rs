//! Small helpers shared by every crate that records OpenTelemetry metrics.

use std::future::Future;
use std::time::Instant;

use opentelemetry::KeyValue;

/// Records the wall-clock duration of a future into a histogram, tagged
/// with the given attributes, once it resolves.
#[async_trait::async_trait]
pub trait RecordDuration: Future + Sized {
	async fn record_duration(
		self,
		histogram: &opentelemetry::metrics::Histogram<f64>,
		attributes: &[KeyValue],
	) -> <Self as Future>::Output
	where
		Self: Send,
	{
		let start = Instant::now();
		let ret = self.await;
		histogram.record(start.elapsed().as_secs_f64(), attributes);
		ret
	}
}

impl<T: Future + Sized> RecordDuration for T {}

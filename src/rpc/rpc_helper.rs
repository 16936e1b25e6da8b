//! Thin wrapper around `netapp`'s endpoint call API: priority tagging,
//! per-call timeouts and quorum-based fan-out, the same shape every table
//! and block-layer RPC in this codebase builds on.

use std::sync::Arc;
use std::time::Duration;

pub use netapp::endpoint::{Endpoint, EndpointHandler};
pub use netapp::message::{Message as Rpc, OrderTag};
pub use netapp::NodeID;
use netapp::peering::fullmesh::FullMeshPeeringStrategy;
use netapp::NetApp;

use shardkv_util::error::Error;

/// Priority bits OR-ed into a `RequestStrategy`. Lower numeric value sorts
/// first in netapp's outbound queues.
pub const PRIO_HIGH: u8 = 0;
pub const PRIO_NORMAL: u8 = 1;
pub const PRIO_SECONDARY: u8 = 2;
pub const PRIO_BACKGROUND: u8 = 3;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call knobs: priority, optional quorum (how many of N responses are
/// enough for `try_call_many` to resolve) and timeout.
#[derive(Clone, Copy)]
pub struct RequestStrategy {
	priority: u8,
	quorum: Option<usize>,
	timeout: Duration,
}

impl RequestStrategy {
	pub fn with_priority(priority: u8) -> Self {
		Self {
			priority,
			quorum: None,
			timeout: DEFAULT_TIMEOUT,
		}
	}

	pub fn with_quorum(mut self, quorum: usize) -> Self {
		self.quorum = Some(quorum);
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

/// Wraps a `netapp::NetApp` handle to provide the call/try_call_many idiom
/// used throughout the demander and the anti-entropy syncer.
pub struct RpcHelper {
	netapp: Arc<NetApp>,
	_fullmesh: Arc<FullMeshPeeringStrategy>,
	rpc_timeout: Duration,
}

impl RpcHelper {
	pub fn new(
		netapp: Arc<NetApp>,
		fullmesh: Arc<FullMeshPeeringStrategy>,
		rpc_timeout: Duration,
	) -> Self {
		Self {
			netapp,
			_fullmesh: fullmesh,
			rpc_timeout,
		}
	}

	pub fn rpc_timeout(&self) -> Duration {
		self.rpc_timeout
	}

	pub fn netapp(&self) -> &Arc<NetApp> {
		&self.netapp
	}

	/// Call a single node and wait for its response, bounded by
	/// `strategy`'s timeout.
	pub async fn call<M, H>(
		&self,
		endpoint: &Arc<Endpoint<M, H>>,
		to: NodeID,
		msg: M,
		strategy: RequestStrategy,
	) -> Result<M::Response, Error>
	where
		M: Rpc + 'static,
		H: EndpointHandler<M> + 'static,
	{
		let fut = endpoint.call(&to, msg, netapp::proto::Priority::from(strategy.priority));
		tokio::time::timeout(strategy.timeout, fut)
			.await
			.map_err(|_| Error::Rpc(format!("timeout calling {:?}", to)))?
			.map_err(|e| Error::Rpc(e.to_string()))
	}

	/// Call several nodes concurrently and succeed as soon as `quorum`
	/// (default: all) of them have answered without error.
	pub async fn try_call_many<M, H>(
		&self,
		endpoint: &Arc<Endpoint<M, H>>,
		to: &[NodeID],
		msg: M,
		strategy: RequestStrategy,
	) -> Result<Vec<M::Response>, Error>
	where
		M: Rpc + Clone + 'static,
		H: EndpointHandler<M> + 'static,
	{
		let quorum = strategy.quorum.unwrap_or(to.len());

		let mut futs = to
			.iter()
			.map(|node| {
				let endpoint = endpoint.clone();
				let msg = msg.clone();
				let node = *node;
				async move {
					let fut = endpoint.call(&node, msg, netapp::proto::Priority::from(strategy.priority));
					tokio::time::timeout(strategy.timeout, fut)
						.await
						.map_err(|_| Error::Rpc(format!("timeout calling {:?}", node)))?
						.map_err(|e| Error::Rpc(e.to_string()))
				}
			})
			.collect::<futures::stream::FuturesUnordered<_>>();

		use futures::StreamExt;
		let mut ok = Vec::with_capacity(quorum);
		let mut last_err = None;
		while let Some(res) = futs.next().await {
			match res {
				Ok(v) => {
					ok.push(v);
					if ok.len() >= quorum {
						return Ok(ok);
					}
				}
				Err(e) => last_err = Some(e),
			}
		}

		Err(last_err.unwrap_or_else(|| Error::Rpc("no nodes to call".into())))
	}
}

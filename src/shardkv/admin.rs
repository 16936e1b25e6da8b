//! Admin RPC endpoint: lets an operator query a cache's current rebalance
//! round and force a re-exchange from any node in the cluster, without
//! going through the data path. Grounded on `table/sync.rs`'s
//! `SyncRpc`/`ReplicaSyncer` endpoint/handler shape; replaces
//! `src/admin_rpc.rs`'s legacy `RpcClient`/`RpcServer`-based `AdminRPC`,
//! which predates the `Endpoint`/`EndpointHandler` idiom used everywhere
//! else in this codebase.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shardkv_rpc::rpc_helper::{Endpoint, EndpointHandler, NodeID, Rpc};
use shardkv_rpc::system::System;
use shardkv_table::demander::Demander;
use shardkv_table::exchange::ExchangeManager;
use shardkv_table::partition::InMemoryPartitionStore;
use shardkv_util::error::Error;

use crate::exchange::CacheExchange;

/// One cache this node drives rebalancing for, as registered with the
/// admin handler at startup.
pub struct CacheHandle {
	pub name: &'static str,
	pub demander: Arc<Demander<InMemoryPartitionStore>>,
	pub store: Arc<InMemoryPartitionStore>,
	pub exchange: Arc<CacheExchange>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AdminRpc {
	RebalanceStatus { cache: String },
	ForcePreload { cache: String },
	Status {
		cache: String,
		/// `RebalanceFuture::state()`'s `Debug` rendering (`Active`,
		/// `Cancelled`, `SucceededTrue`, `SucceededFalse`).
		state: String,
		topology_version: Option<String>,
		update_seq: i64,
		has_pending_exchange: bool,
	},
	Ok,
}

impl Rpc for AdminRpc {
	type Response = Result<AdminRpc, Error>;
}

pub struct AdminRpcHandler {
	#[allow(dead_code)]
	system: Arc<System>,
	caches: Vec<CacheHandle>,
	endpoint: Arc<Endpoint<AdminRpc, Self>>,
}

impl AdminRpcHandler {
	pub fn new(system: Arc<System>, caches: Vec<CacheHandle>) -> Arc<Self> {
		let endpoint = system.netapp.endpoint("shardkv/admin.rs/Rpc".into());
		let handler = Arc::new(Self { system, caches, endpoint });
		handler.endpoint.set_handler(handler.clone());
		handler
	}

	fn find(&self, name: &str) -> Result<&CacheHandle, Error> {
		self.caches
			.iter()
			.find(|c| c.name == name)
			.ok_or_else(|| Error::Message(format!("no such cache: {}", name)))
	}

	async fn status(&self, name: &str) -> Result<AdminRpc, Error> {
		let cache = self.find(name)?;
		let current = cache.demander.sync_future().await;
		Ok(AdminRpc::Status {
			cache: name.to_string(),
			state: format!("{:?}", current.state()),
			topology_version: current.topology_version().map(|v| v.to_string()),
			update_seq: current.update_seq(),
			has_pending_exchange: cache.exchange.has_pending_exchange(),
		})
	}
}

#[async_trait]
impl EndpointHandler<AdminRpc> for AdminRpcHandler {
	async fn handle(self: &Arc<Self>, message: &AdminRpc, _from: NodeID) -> Result<AdminRpc, Error> {
		match message {
			AdminRpc::RebalanceStatus { cache } => self.status(cache).await,
			AdminRpc::ForcePreload { cache } => {
				let handle = self.find(cache)?;
				handle.demander.force_preload().await;
				Ok(AdminRpc::Ok)
			}
			other => Err(Error::unexpected_rpc_message(other.clone())),
		}
	}
}

//! `System`: the per-node handle bundling the local node id, the netapp
//! transport, the cluster layout tracker and the `RpcHelper`. Every
//! demander, syncer and admin endpoint is constructed from one of these.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

use shardkv_util::error::Error;

use netapp::peering::fullmesh::FullMeshPeeringStrategy;
use netapp::{NetApp, NetworkKey, NodeID, NodeKey};

use shardkv_util::data::NodeId;

use crate::layout::{Affinity, ClusterLayout, ClusterLayoutTracker, PartitionId, TopologyVersion};
use crate::rpc_helper::RpcHelper;

pub struct System {
	pub id: NodeId,
	pub netapp: Arc<NetApp>,
	fullmesh: Arc<FullMeshPeeringStrategy>,
	rpc: RpcHelper,
	layout: ClusterLayoutTracker,
	/// Notified every time the cluster layout changes, so demanders and the
	/// anti-entropy syncer can wake up and re-check their assignments.
	layout_notify: Notify,
}

impl System {
	pub fn new(
		id: NodeId,
		node_key: NodeKey,
		network_key: NetworkKey,
		rpc_public_addr: SocketAddr,
		rpc_timeout: Duration,
		initial_layout: ClusterLayout,
	) -> Arc<Self> {
		let netapp = NetApp::new(network_key, node_key);
		let fullmesh = FullMeshPeeringStrategy::new(netapp.clone(), vec![], Some(rpc_public_addr));
		let rpc = RpcHelper::new(netapp.clone(), fullmesh.clone(), rpc_timeout);

		Arc::new(Self {
			id,
			netapp,
			fullmesh,
			rpc,
			layout: ClusterLayoutTracker::new(id, initial_layout),
			layout_notify: Notify::new(),
		})
	}

	pub fn rpc_helper(&self) -> &RpcHelper {
		&self.rpc
	}

	pub fn node_id(&self) -> NodeID {
		self.netapp.id
	}

	pub fn cluster_layout(&self) -> Arc<ClusterLayout> {
		self.layout.current()
	}

	pub fn topology_version(&self) -> TopologyVersion {
		self.layout.topology_version()
	}

	pub fn layout(&self) -> &ClusterLayoutTracker {
		&self.layout
	}

	pub fn layout_notify(&self) -> &Notify {
		&self.layout_notify
	}

	/// Install a new cluster layout and wake up everyone waiting on
	/// `layout_notify`.
	pub fn update_layout(&self, layout: ClusterLayout) {
		self.layout.update(layout);
		self.layout_notify.notify_waiters();
	}

	pub async fn bootstrap(self: &Arc<Self>, bootstrap_peers: Vec<(NodeID, SocketAddr)>) {
		self.fullmesh.set_peer_list(&bootstrap_peers);
	}

	/// Runs the transport: accepts incoming connections on `rpc_bind_addr`
	/// and maintains the full-mesh peering loop, until `must_exit` fires.
	pub async fn run(self: Arc<Self>, rpc_bind_addr: SocketAddr, must_exit: watch::Receiver<bool>) -> Result<(), Error> {
		let listen = self.netapp.clone().listen(rpc_bind_addr, None, must_exit.clone());
		let peering = self.fullmesh.clone().run(must_exit);
		tokio::select! {
			_ = listen => {},
			_ = peering => {},
		}
		Ok(())
	}

	/// An `Affinity` handle over this system's layout tracker, owned and
	/// cheaply cloned, for collaborators (like `OrderingGate`) that outlive
	/// any single rebalance round and can't borrow from `System` directly.
	pub fn affinity(self: &Arc<Self>) -> Arc<dyn Affinity> {
		Arc::new(SystemAffinity(self.clone()))
	}
}

struct SystemAffinity(Arc<System>);

impl Affinity for SystemAffinity {
	fn is_local(&self, partition: PartitionId, topology_version: TopologyVersion) -> bool {
		self.0.layout().is_local(partition, topology_version)
	}
	fn primary(&self, partition: PartitionId, topology_version: TopologyVersion) -> NodeId {
		self.0.layout().primary(partition, topology_version)
	}
	fn topology_version(&self) -> TopologyVersion {
		self.0.topology_version()
	}
	fn suppliers(&self, partition: PartitionId, topology_version: TopologyVersion) -> Vec<NodeId> {
		self.0.layout().suppliers(partition, topology_version)
	}
}

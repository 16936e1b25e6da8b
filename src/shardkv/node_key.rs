//! Bootstraps this node's persistent transport identity and parses the
//! cluster-wide symmetric network key, the way a real garage node derives
//! both from `Config::node_id_file`/`Config::rpc_secret` before constructing
//! its `System`.

use std::convert::TryFrom;
use std::path::Path;

use netapp::{NetworkKey, NodeKey};

use shardkv_util::data::NodeId;
use shardkv_util::error::Error;

/// Reads the node key from `path`, generating and persisting a fresh one on
/// first start. The returned `NodeId` is the low 16 bytes of the transport
/// public key, padded back out by `shardkv_rpc::layout::netapp_node_id` at
/// every RPC call site.
pub fn read_or_create_node_key(path: &Path) -> Result<(NodeKey, NodeId), Error> {
	let key = if path.exists() {
		let bytes = std::fs::read(path)?;
		NodeKey::from_slice(&bytes)
			.ok_or_else(|| Error::Message(format!("invalid node key in {}", path.display())))?
	} else {
		let key = NodeKey::generate();
		std::fs::write(path, key.as_ref())?;
		key
	};
	let id = NodeId::try_from(&key.public_key().as_ref()[..16])?;
	Ok((key, id))
}

/// An ephemeral identity, used by one-shot CLI commands that dial into the
/// cluster without taking part in its membership.
pub fn ephemeral_node_key() -> (NodeKey, NodeId) {
	let key = NodeKey::generate();
	let id = NodeId::try_from(&key.public_key().as_ref()[..16])
		.expect("generated node key always has a 16-byte id prefix");
	(key, id)
}

/// Parses `Config::rpc_secret`, a 32-byte hex-encoded symmetric key shared
/// by every node in the cluster.
pub fn parse_network_key(hex_str: &str) -> Result<NetworkKey, Error> {
	let bytes = hex::decode(hex_str).map_err(|e| Error::Message(format!("invalid rpc_secret: {}", e)))?;
	NetworkKey::from_slice(&bytes).ok_or_else(|| Error::Message("rpc_secret must be exactly 32 bytes".into()))
}

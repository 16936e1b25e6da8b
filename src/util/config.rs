//! Contains type and functions related to shardkv's configuration file
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::de::Error as SerdeError;
use serde::{de, Deserialize};

use netapp::util::parse_and_resolve_peer_addr;
use netapp::NodeID;

use crate::error::Error;

/// Represent the whole configuration
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// Path to the file holding this node's persistent identifier
	#[serde(default = "default_node_id_file")]
	pub node_id_file: PathBuf,
	/// Path where to store partition metadata and data
	pub metadata_dir: PathBuf,

	/// Address to bind for RPC
	pub rpc_bind_addr: SocketAddr,
	/// Public address of this node, as seen by the rest of the cluster
	pub rpc_public_addr: Option<SocketAddr>,
	/// RPC secret key: 32 bytes hex encoded
	pub rpc_secret: String,

	/// Bootstrap peers RPC address
	#[serde(deserialize_with = "deserialize_vec_addr", default)]
	pub bootstrap_peers: Vec<(NodeID, SocketAddr)>,

	/// Number of partitions each cache is split into
	#[serde(default = "default_partition_count")]
	pub partition_count: u16,
	/// Number of nodes that should hold a replica of each partition
	#[serde(default = "default_replication_factor")]
	pub replication_factor: usize,

	/// How rebalance futures report their result to callers blocked on
	/// `sync_future`. Supported values: "sync", "async".
	#[serde(default = "default_rebalance_mode")]
	pub rebalance_mode: String,
	/// Delay, in milliseconds, the demander's `RetryTimer` waits before
	/// retrying a cache's pending exchange after a failed or partial round.
	#[serde(default = "default_rebalance_delay_ms")]
	pub rebalance_delay_ms: u64,
	/// Per-attempt timeout, in milliseconds, after which a rebalance future
	/// not yet done is forced to check for missed partitions.
	#[serde(default = "default_rebalance_timeout_ms")]
	pub rebalance_timeout_ms: u64,
	/// Size of the background worker pool driving demand/supply exchanges.
	#[serde(default = "default_rebalance_thread_pool_size")]
	pub rebalance_thread_pool_size: usize,
	/// Interval, in seconds, between full anti-entropy sync rounds for a
	/// cache's already-owned partitions.
	#[serde(default = "default_anti_entropy_interval_secs")]
	pub anti_entropy_interval_secs: u64,

	/// Sled cache size, in bytes
	#[serde(default = "default_sled_cache_capacity")]
	pub sled_cache_capacity: u64,
	/// Sled flush interval in milliseconds
	#[serde(default = "default_sled_flush_every_ms")]
	pub sled_flush_every_ms: u64,
}

fn default_node_id_file() -> PathBuf {
	PathBuf::from("node_id")
}
fn default_partition_count() -> u16 {
	256
}
fn default_replication_factor() -> usize {
	3
}
fn default_rebalance_mode() -> String {
	"sync".to_string()
}
fn default_rebalance_delay_ms() -> u64 {
	5_000
}
fn default_rebalance_timeout_ms() -> u64 {
	30_000
}
fn default_rebalance_thread_pool_size() -> usize {
	4
}
fn default_anti_entropy_interval_secs() -> u64 {
	10 * 60
}
fn default_sled_cache_capacity() -> u64 {
	128 * 1024 * 1024
}
fn default_sled_flush_every_ms() -> u64 {
	2000
}

/// Read and parse configuration
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	Ok(toml::from_str(&config)?)
}

fn deserialize_vec_addr<'de, D>(deserializer: D) -> Result<Vec<(NodeID, SocketAddr)>, D::Error>
where
	D: de::Deserializer<'de>,
{
	let mut ret = vec![];

	for peer in <Vec<&str>>::deserialize(deserializer)? {
		let (pubkey, addrs) = parse_and_resolve_peer_addr(peer).ok_or_else(|| {
			D::Error::custom(format!("Unable to parse or resolve peer: {}", peer))
		})?;
		for ip in addrs {
			ret.push((pubkey, ip));
		}
	}

	Ok(ret)
}

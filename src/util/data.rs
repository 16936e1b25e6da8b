//! Core identifier types shared across the workspace.

use std::convert::TryFrom;
use std::fmt;

use blake2::{Blake2b512, Digest as _};
use serde::{Deserialize, Serialize};

/// A 16-byte node identifier, stable across restarts (persisted in the
/// node's metadata directory the first time it starts).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 16]);

impl NodeId {
	pub fn random() -> Self {
		let mut bytes = [0u8; 16];
		rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
		Self(bytes)
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}
}

impl TryFrom<&[u8]> for NodeId {
	type Error = crate::error::Error;

	fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
		if slice.len() != 16 {
			return Err(crate::error::Error::Message(format!(
				"invalid node id length: {}",
				slice.len()
			)));
		}
		let mut bytes = [0u8; 16];
		bytes.copy_from_slice(slice);
		Ok(Self(bytes))
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0.iter() {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "NodeId({})", self)
	}
}

/// A cache/table identifier, small and stable for the process lifetime.
pub type CacheId = u16;

/// A partition number within a cache, assigned by the affinity function.
pub type PartitionId = u16;

/// A process-unique, monotonically assigned sequence number used to order
/// rebalance futures and to discard stale supply messages.
pub type UpdateSeq = i64;

/// `(epoch, order)`, compared lexicographically: a newer topology always
/// sorts greater than an older one, and within the same epoch, a higher
/// `order` denotes a later incremental change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TopologyVersion {
	pub epoch: u64,
	pub order: u64,
}

impl TopologyVersion {
	pub const ZERO: TopologyVersion = TopologyVersion { epoch: 0, order: 0 };

	pub fn new(epoch: u64, order: u64) -> Self {
		Self { epoch, order }
	}
}

impl fmt::Display for TopologyVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.epoch, self.order)
	}
}

/// A 32-byte content digest, used by the anti-entropy syncer's Merkle tree
/// to compare item values and subtrees without shipping them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl fmt::Display for Digest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0.iter() {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Digest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Digest({})", self)
	}
}

/// Hashes `data` with Blake2b, truncated to 32 bytes. Used for Merkle leaf
/// and subtree hashes; not a cryptographic commitment, just a cheap digest
/// for detecting divergence between replicas.
pub fn blake2sum(data: &[u8]) -> Digest {
	let mut hasher = Blake2b512::new();
	hasher.update(data);
	let out = hasher.finalize();
	let mut bytes = [0u8; 32];
	bytes.copy_from_slice(&out[..32]);
	Digest(bytes)
}

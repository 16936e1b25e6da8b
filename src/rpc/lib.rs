//! Cluster membership, partition layout and RPC transport shared by every
//! cache in the shardkv workspace.

pub mod layout;
pub mod rpc_helper;
pub mod system;

pub use rpc_helper::*;

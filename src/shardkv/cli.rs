//! Top-level subcommands and the one-shot admin client. Grounded on
//! `src/garage/cli.rs`'s `Command` enum/`cli_cmd` dispatcher shape, cut down
//! to the two things SPEC_FULL's admin surface actually asks for
//! (rebalance status, forcing a preload) instead of the teacher's
//! bucket/key/node/repair commands, which have no counterpart once the S3
//! object store is gone.

use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;
use tracing::info;

use shardkv_rpc::rpc_helper::{NodeID, RequestStrategy, PRIO_NORMAL};
use shardkv_rpc::system::System;
use shardkv_util::error::Error;

use crate::admin::{AdminRpc, AdminRpcHandler};

#[derive(StructOpt, Debug)]
pub enum Command {
	/// Run the node: bootstrap identity, wire caches, serve RPCs
	#[structopt(name = "server")]
	Server(ServerOpt),

	/// Print the current rebalance round for a cache
	#[structopt(name = "status")]
	Status(CacheOpt),

	/// Cancel the retry timer and force a re-exchange for a cache
	#[structopt(name = "force-preload")]
	ForcePreload(CacheOpt),
}

#[derive(StructOpt, Debug)]
pub struct ServerOpt {
	/// Configuration file
	#[structopt(short = "c", long = "config", default_value = "./config.toml")]
	pub config_file: PathBuf,
}

#[derive(StructOpt, Debug)]
pub struct CacheOpt {
	/// Cache name ("accounts" or "customers" in the example binary)
	pub cache: String,
}

/// One-shot commands dial a single remote node's admin endpoint, using a
/// disposable `System`/identity that never joins the cluster (spec.md's CLI
/// is a client, not a peer).
pub async fn cli_cmd(cmd: Command, system: Arc<System>, target: (NodeID, std::net::SocketAddr)) -> Result<(), Error> {
	let (target_id, target_addr) = target;
	system.bootstrap(vec![(target_id, target_addr)]).await;

	// The CLI never receives calls on this endpoint, only makes them; naming
	// `AdminRpcHandler` as the type parameter just lets `Endpoint<AdminRpc, _>`
	// resolve without constructing one. `set_handler` is never called.
	let endpoint = system.netapp.endpoint::<AdminRpc, AdminRpcHandler>("shardkv/admin.rs/Rpc".into());

	match cmd {
		Command::Server(_) => unreachable!("server is dispatched before cli_cmd"),
		Command::Status(CacheOpt { cache }) => {
			let resp = system
				.rpc_helper()
				.call(&endpoint, target_id, AdminRpc::RebalanceStatus { cache }, RequestStrategy::with_priority(PRIO_NORMAL))
				.await??;
			print_admin_response(resp);
		}
		Command::ForcePreload(CacheOpt { cache }) => {
			let resp = system
				.rpc_helper()
				.call(&endpoint, target_id, AdminRpc::ForcePreload { cache }, RequestStrategy::with_priority(PRIO_NORMAL))
				.await??;
			print_admin_response(resp);
		}
	}

	Ok(())
}

fn print_admin_response(resp: AdminRpc) {
	match resp {
		AdminRpc::Status {
			cache,
			state,
			topology_version,
			update_seq,
			has_pending_exchange,
		} => {
			println!("cache: {}", cache);
			println!("state: {}", state);
			println!("topology_version: {}", topology_version.unwrap_or_else(|| "-".to_string()));
			println!("update_seq: {}", update_seq);
			println!("pending exchange: {}", has_pending_exchange);
		}
		AdminRpc::Ok => info!("ok"),
		other => println!("unexpected response: {:?}", other),
	}
}

/// Parses a `<node-id>@<host>:<port>` peer string into the pair `cli_cmd`
/// dials, the same format `Config::bootstrap_peers` accepts.
pub fn parse_target(peer: &str) -> Result<(NodeID, std::net::SocketAddr), Error> {
	let (pubkey, addrs) = netapp::util::parse_and_resolve_peer_addr(peer)
		.ok_or_else(|| Error::Message(format!("could not parse or resolve peer: {}", peer)))?;
	let addr = addrs
		.into_iter()
		.next()
		.ok_or_else(|| Error::Message(format!("no address resolved for peer: {}", peer)))?;
	Ok((pubkey, addr))
}

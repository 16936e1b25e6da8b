//! Node bootstrap: load configuration, stand up the transport and cluster
//! layout, wire two example caches to the rebalancing core, and run until a
//! shutdown signal arrives. Grounded on `src/garage/server.rs`'s
//! `run_server` sequence (load config → build background runner → spawn
//! workers → launch transport → wait for shutdown), generalized from one
//! `Garage` data store to an arbitrary set of caches, each independently
//! rebalanced.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use shardkv_rpc::layout::ClusterLayout;
use shardkv_rpc::system::System;
use shardkv_table::demander::{Demander, DemanderConfig, RebalanceMode};
use shardkv_table::metrics::RebalanceMetrics;
use shardkv_table::ordering_gate::{OrderingGate, SyncSource};
use shardkv_table::partition::InMemoryPartitionStore;
use shardkv_table::sync::{ReplicaSyncer, SyncWorker};
use shardkv_util::background::BackgroundRunner;
use shardkv_util::config::{read_config, Config};
use shardkv_util::error::Error;

use crate::admin::{AdminRpcHandler, CacheHandle};
use crate::exchange::ExchangeWorker;
use crate::node_key::{parse_network_key, read_or_create_node_key};

async fn wait_from(mut chan: watch::Receiver<bool>) {
	while !*chan.borrow() {
		if chan.changed().await.is_err() {
			return;
		}
	}
}

fn rebalance_mode(config: &Config) -> RebalanceMode {
	match config.rebalance_mode.as_str() {
		"async" => RebalanceMode::Async,
		"none" => RebalanceMode::None,
		_ => RebalanceMode::Sync,
	}
}

pub async fn run_server(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(config_file)?;

	info!("Loading node identity...");
	let (node_key, node_id) = read_or_create_node_key(&config.node_id_file)?;
	let network_key = parse_network_key(&config.rpc_secret)?;
	let rpc_public_addr = config.rpc_public_addr.unwrap_or(config.rpc_bind_addr);

	info!("Initializing cluster layout and transport...");
	let initial_layout = ClusterLayout::new(vec![node_id], config.replication_factor);
	let system = System::new(
		node_id,
		node_key,
		network_key,
		rpc_public_addr,
		Duration::from_secs(10),
		initial_layout,
	);

	info!("Initializing background runner...");
	let watch_cancel = watch_shutdown_signal();
	let (background, await_background_done) = BackgroundRunner::new(config.rebalance_thread_pool_size, watch_cancel.clone());

	info!("Wiring rebalanced caches...");
	let demander_config = DemanderConfig {
		mode: rebalance_mode(&config),
		delay: Duration::from_millis(config.rebalance_delay_ms),
		timeout: Duration::from_millis(config.rebalance_timeout_ms),
		lanes: 4,
	};

	let accounts_store = Arc::new(InMemoryPartitionStore::new(0..config.partition_count));
	let (accounts_exchange, accounts_exchange_worker) =
		ExchangeWorker::new(system.clone(), accounts_store.clone(), config.partition_count, "accounts");
	let accounts_demander = Demander::new(
		system.clone(),
		0,
		"accounts",
		accounts_store.clone(),
		accounts_exchange.clone(),
		demander_config,
		None,
	);
	accounts_exchange_worker.bind(accounts_demander.clone());

	let customers_store = Arc::new(InMemoryPartitionStore::new(0..config.partition_count));
	let (customers_exchange, customers_exchange_worker) =
		ExchangeWorker::new(system.clone(), customers_store.clone(), config.partition_count, "customers");
	// `customers` won't start requesting a partition until `accounts`'s own
	// rebalance round for it has resolved, the way a foreign-key table
	// waits on the table it references.
	let accounts_as_prerequisite: Arc<dyn SyncSource> = accounts_demander.clone();
	let customers_gate = OrderingGate::new(system.affinity(), vec![("accounts".to_string(), accounts_as_prerequisite)]);
	let customers_demander = Demander::new(
		system.clone(),
		1,
		"customers",
		customers_store.clone(),
		customers_exchange.clone(),
		demander_config,
		Some(customers_gate),
	);
	customers_exchange_worker.bind(customers_demander.clone());

	let anti_entropy_interval = Duration::from_secs(config.anti_entropy_interval_secs);
	let accounts_syncer = ReplicaSyncer::new(
		system.clone(),
		0,
		"accounts",
		accounts_store.clone(),
		Arc::new(RebalanceMetrics::new("accounts")),
	);
	let customers_syncer = ReplicaSyncer::new(
		system.clone(),
		1,
		"customers",
		customers_store.clone(),
		Arc::new(RebalanceMetrics::new("customers")),
	);

	background.spawn_worker(accounts_exchange_worker);
	background.spawn_worker(customers_exchange_worker);
	background.spawn_worker(SyncWorker::new(accounts_syncer, anti_entropy_interval));
	background.spawn_worker(SyncWorker::new(customers_syncer, anti_entropy_interval));

	info!("Create admin RPC handler...");
	AdminRpcHandler::new(
		system.clone(),
		vec![
			CacheHandle {
				name: "accounts",
				demander: accounts_demander,
				store: accounts_store,
				exchange: accounts_exchange,
			},
			CacheHandle {
				name: "customers",
				demander: customers_demander,
				store: customers_store,
				exchange: customers_exchange,
			},
		],
	);

	info!("Bootstrapping cluster peering...");
	system.bootstrap(config.bootstrap_peers.clone()).await;

	info!("Launching internal cluster transport...");
	let run_system = tokio::spawn(system.clone().run(config.rpc_bind_addr, watch_cancel.clone()));

	wait_from(watch_cancel.clone()).await;

	info!("Shutting down...");
	system.netapp.drop_all_handlers();

	if let Err(e) = run_system.await? {
		error!("Transport exited with error: {}", e);
	}

	drop(system);

	await_background_done.await?;

	info!("Cleaning up...");
	Ok(())
}

#[cfg(unix)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::unix::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
		let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
		let mut sighup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");
		tokio::select! {
			_ = sigint.recv() => info!("Received SIGINT, shutting down."),
			_ = sigterm.recv() => info!("Received SIGTERM, shutting down."),
			_ = sighup.recv() => info!("Received SIGHUP, shutting down."),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}

#[cfg(windows)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::windows::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = ctrl_c().expect("Failed to install Ctrl-C handler");
		let mut sigclose = ctrl_close().expect("Failed to install Ctrl-Close handler");
		let mut siglogoff = ctrl_logoff().expect("Failed to install Ctrl-Logoff handler");
		let mut sigsdown = ctrl_shutdown().expect("Failed to install Ctrl-Shutdown handler");
		tokio::select! {
			_ = sigint.recv() => info!("Received Ctrl-C, shutting down."),
			_ = sigclose.recv() => info!("Received Ctrl-Close, shutting down."),
			_ = siglogoff.recv() => info!("Received Ctrl-Logoff, shutting down."),
			_ = sigsdown.recv() => info!("Received Ctrl-Shutdown, shutting down."),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}

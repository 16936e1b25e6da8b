//! The partition rebalancing core: given a per-topology-version assignment
//! of partitions to suppliers, drives demand/supply message exchange until
//! every locally-owned partition has been transferred in, while keeping
//! cross-cache ordering and external write access under control.

pub mod assignment;
pub mod demand_lock;
pub mod demander;
pub mod exchange;
pub mod future;
pub mod metrics;
pub mod ordering_gate;
pub mod partition;
pub mod retry_timer;
pub mod sync;

pub use assignment::AssignmentBatch;
pub use demander::Demander;
pub use future::RebalanceFuture;
pub use partition::{PartitionStore, PartitionTransferState};
pub use sync::{ReplicaSource, ReplicaSyncer, SyncWorker};

//! Lifecycle events emitted by the manager and the ingestion endpoint.

mod sink;

pub use sink::{BundleEvent, EventSink, LoggingEventSink};

/// A phase began.
pub const PHASE_STARTED: &str = "phase.started";
/// A phase finished successfully.
pub const PHASE_COMPLETED: &str = "phase.completed";
/// A phase failed; the run stops.
pub const PHASE_FAILED: &str = "phase.failed";
/// The agent workload was created.
pub const AGENTS_SPAWNED: &str = "agents.spawned";
/// The agent workload was deleted.
pub const AGENTS_DELETED: &str = "agents.deleted";
/// The agent workload was left in place for inspection.
pub const AGENTS_RETAINED: &str = "agents.retained";
/// A node bundle was accepted.
pub const NODE_COMPLETED: &str = "node.completed";
/// A node bundle was rejected.
pub const NODE_REJECTED: &str = "node.rejected";
/// The wait window elapsed with nodes still pending.
pub const NODES_TIMED_OUT: &str = "nodes.timed_out";

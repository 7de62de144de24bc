//! Node set tracker.
//!
//! Holds the nodes still expected to upload a bundle. Ingestion tasks call
//! [`NodeSetTracker::mark_complete`] concurrently; the control task suspends in
//! [`NodeSetTracker::await_completion`] until the set drains, the wait times
//! out, or the run is cancelled. After the wait the set is closed and no
//! further bundle is stored.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::errors::{BundleError, Result};

/// How the wait for node bundles ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every expected node uploaded a valid bundle.
    Completed,
    /// The wait window elapsed with nodes still pending.
    TimedOut,
    /// The run was cancelled while waiting.
    Cancelled,
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// node name -> completion marker
    expected: HashMap<String, String>,
    done: bool,
    closed: bool,
}

/// Tracks which nodes have reported.
pub struct NodeSetTracker {
    inner: Mutex<Inner>,
    signal: watch::Sender<bool>,
}

impl Default for NodeSetTracker {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            signal: watch::Sender::new(false),
        }
    }
}

impl NodeSetTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the expected node set and re-arms the completion signal.
    ///
    /// An empty set is an error: with no matching nodes there is nothing to wait for.
    pub fn initialize<I, S>(&self, nodes: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expected: HashMap<String, String> = nodes
            .into_iter()
            .map(|node| (node.into(), String::new()))
            .collect();
        if expected.is_empty() {
            return Err(BundleError::NoNodesMatched {
                selector: String::new(),
            });
        }

        let mut inner = self.inner.lock();
        debug!(nodes = ?expected.keys().collect::<Vec<_>>(), "expected bundles from nodes");
        inner.expected = expected;
        inner.done = false;
        inner.closed = false;
        self.signal.send_replace(false);
        Ok(())
    }

    /// Marks a node as complete.
    ///
    /// Returns true if the node was still expected. Draining the set fires the
    /// completion signal exactly once; calls after that are no-ops.
    pub fn mark_complete(&self, node: &str) -> bool {
        let mut inner = self.inner.lock();
        self.complete_locked(&mut inner, node)
    }

    /// Runs `store` and completes `node` under the set lock.
    ///
    /// Returns `Ok(None)` without calling `store` once the set is closed, so
    /// nothing is written after [`close`](Self::close) returns. Otherwise the
    /// stored value and whether the node was still expected.
    pub fn complete_with<T, F>(&self, node: &str, store: F) -> Result<Option<(T, bool)>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!(node = %node, "node set closed");
            return Ok(None);
        }
        let value = store()?;
        let removed = self.complete_locked(&mut inner, node);
        Ok(Some((value, removed)))
    }

    fn complete_locked(&self, inner: &mut Inner, node: &str) -> bool {
        let removed = inner.expected.remove(node).is_some();
        if removed {
            debug!(node = %node, "complete node");
        } else {
            warn!(node = %node, "complete an unknown node");
        }

        if removed && inner.expected.is_empty() && !inner.done {
            debug!("all nodes are completed");
            inner.done = true;
            self.signal.send_replace(true);
        }

        removed
    }

    /// Stops accepting bundles. Waits for a [`complete_with`](Self::complete_with)
    /// in progress to finish.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            debug!(pending = inner.expected.len(), "close node set");
            inner.closed = true;
        }
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Waits until every node has reported, the timeout elapses, or `cancel` fires.
    ///
    /// Returns as soon as the first of the three happens.
    pub async fn await_completion(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let mut rx = self.signal.subscribe();

        tokio::select! {
            res = rx.wait_for(|done| *done) => {
                if res.is_ok() {
                    WaitOutcome::Completed
                } else {
                    WaitOutcome::Cancelled
                }
            }
            () = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            () = cancel.cancelled() => WaitOutcome::Cancelled,
        }
    }

    /// Nodes that have not reported yet, sorted.
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let pending: BTreeSet<&String> = inner.expected.keys().collect();
        pending.into_iter().cloned().collect()
    }

    /// Returns true if the node is still expected.
    #[must_use]
    pub fn is_pending(&self, node: &str) -> bool {
        self.inner.lock().expected.contains_key(node)
    }

    /// Returns true once the completion signal has fired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }
}

impl fmt::Debug for NodeSetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NodeSetTracker")
            .field("pending", &inner.expected.len())
            .field("done", &inner.done)
            .field("closed", &inner.closed)
            .finish()
    }
}

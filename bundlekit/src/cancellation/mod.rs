//! Structured cancellation.
//!
//! A single [`CancellationToken`] is shared by the phase state machine, the
//! node completion wait and the ingestion server so that a shutdown signal
//! releases all of them.

mod token;

pub use token::CancellationToken;

//! Testing utilities for the bundle manager.
//!
//! This module provides:
//! - Fake cluster API and exporter
//! - An event sink that keeps what it receives
//! - Archive and configuration fixtures
//! - Status assertions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_status_done, assert_status_failed};
pub use fixtures::{
    empty_archive, node_bundle_archive, test_config, test_request, TEST_BUNDLE, TEST_NAMESPACE,
};
pub use mocks::{FakeClusterApi, FakeExporter, RecordingEventSink};

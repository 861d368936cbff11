//! Test utilities for Rewind graphs.
//!
//! * [`Recorder`] and its recorded transitions log every derive and release,
//!   so tests can assert exact orders.
//! * [`FakeLauncher`] runs "processes" in memory; fake servers hold a real
//!   TCP listener on their port.
//! * [`fake_collaborators`] wires the fakes into the default process graphs.

pub mod fake;
pub mod recorder;

pub use fake::{FakeLauncher, FakeProcess, FixedPortAllocator, StaticResolver, fake_collaborators};
pub use recorder::{Event, Recorder, RecordingProgress, node};

/// Install a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    rewind_observe::init_test_tracing();
}

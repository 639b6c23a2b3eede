//! Test infrastructure for fleet provisioning
//!
//! Provides:
//! - [`FakeDashboard`]: in-memory controller implementing the client traits
//! - [`ManualTicker`]: ticker that records waits instead of sleeping
//! - Site, inventory and build context fixtures

mod controller;
pub mod fixtures;
mod ticker;

pub use controller::{FakeDashboard, FAKE_ORG};
pub use fixtures::*;
pub use ticker::ManualTicker;

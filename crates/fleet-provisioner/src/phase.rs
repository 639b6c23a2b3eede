//! Provisioning phases and per-phase reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four ordered provisioning stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Create one network per site from the template
    Networks,
    /// Claim every site's devices into its network
    Devices,
    /// Configure devices, VLANs, group policies and switch ports
    Settings,
    /// Delete every recorded network
    Teardown,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::Networks,
        Phase::Devices,
        Phase::Settings,
        Phase::Teardown,
    ];

    /// Lowercase name, used in payload dump file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Networks => "networks",
            Phase::Devices => "devices",
            Phase::Settings => "settings",
            Phase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Networks => write!(f, "Networks"),
            Phase::Devices => write!(f, "Devices"),
            Phase::Settings => write!(f, "Settings"),
            Phase::Teardown => write!(f, "Teardown"),
        }
    }
}

/// Per-site failure recorded in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFailure {
    /// Site number
    pub site: String,
    /// Full error list
    pub errors: Vec<String>,
}

/// Summary of one phase invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    /// The phase that ran
    pub phase: Phase,
    /// Sites whose postcondition was recorded
    pub succeeded: Vec<String>,
    /// Sites that failed and remain eligible for retry
    pub failed: Vec<SiteFailure>,
    /// Sites not processed, with the reason
    pub skipped: Vec<(String, String)>,
    /// Batch ids submitted during the phase
    pub batches: Vec<String>,
}

impl PhaseReport {
    /// Creates an empty report.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            batches: Vec::new(),
        }
    }

    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns true if the phase had nothing to do.
    pub fn is_noop(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty() && self.batches.is_empty()
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed, {} skipped, {} batch(es)",
            self.phase,
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len(),
            self.batches.len()
        )
    }
}

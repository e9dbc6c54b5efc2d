//! Fixed control plane resources that receive the reported IP.
//!
//! The workspace and variable are baked into the build. They are never
//! looked up at runtime, so a rebuild is required to point the bridge at a
//! different binding.

/// Workspace holding the DNS configuration
pub const DNS_WORKSPACE_ID: &str = "ws-KidBzbXUjLSXKYgH";

/// Variable inside [`DNS_WORKSPACE_ID`] carrying the public IP
pub const DNS_VARIABLE_ID: &str = "var-ovgRSmpM1gLBgywH";

/// Message attached to every triggered run
pub const RUN_MESSAGE: &str = "Triggered via dynamic dns.";

/// The workspace/variable binding updated on every accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPlaneTarget {
    /// Workspace the variable lives in and the run is queued for
    pub workspace_id: &'static str,
    /// Variable receiving the IP
    pub variable_id: &'static str,
    /// Human-readable run message
    pub run_message: &'static str,
    /// Whether the triggered run applies without confirmation
    pub auto_apply: bool,
}

impl ControlPlaneTarget {
    /// The DNS variable binding compiled into this build
    pub const fn dns() -> Self {
        Self {
            workspace_id: DNS_WORKSPACE_ID,
            variable_id: DNS_VARIABLE_ID,
            run_message: RUN_MESSAGE,
            auto_apply: true,
        }
    }
}

impl Default for ControlPlaneTarget {
    fn default() -> Self {
        Self::dns()
    }
}

// # Control Plane Trait
//
// Defines the interface for pushing the reported IP to an
// infrastructure-as-code platform.
//
// ## Implementations
//
// - Terraform Cloud / Enterprise: `ddns-control-terraform` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_bridge_core::ControlPlane;
//
// async fn push(control_plane: &dyn ControlPlane) -> ddns_bridge_core::Result<()> {
//     control_plane
//         .update_variable("ws-123", "var-456", "203.0.113.7")
//         .await?;
//     control_plane
//         .create_run("ws-123", "Triggered via dynamic dns.", true)
//         .await
// }
// ```

use async_trait::async_trait;

/// Trait for control plane implementations
///
/// The bridge only cares whether a call succeeded. Payloads returned by the
/// platform are discarded by implementations, and every failure (transport,
/// authentication, remote side) is reported as an `Err`.
///
/// # Thread Safety
///
/// Implementations are shared between all connections and must be usable
/// from concurrent tasks without external locking.
///
/// # Constraints
///
/// - One remote attempt per call. No retries or backoff.
/// - No caching of previously written values.
/// - No background tasks.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Set the value of a workspace variable
    ///
    /// # Parameters
    ///
    /// - `workspace_id`: Workspace owning the variable
    /// - `variable_id`: Variable to overwrite
    /// - `value`: New value, passed through verbatim
    async fn update_variable(
        &self,
        workspace_id: &str,
        variable_id: &str,
        value: &str,
    ) -> Result<(), crate::Error>;

    /// Queue a run for a workspace
    ///
    /// The run is fire-and-forget: its identifier is not returned.
    ///
    /// # Parameters
    ///
    /// - `workspace_id`: Workspace to run
    /// - `message`: Human-readable run message
    /// - `auto_apply`: Apply the plan without confirmation
    async fn create_run(
        &self,
        workspace_id: &str,
        message: &str,
        auto_apply: bool,
    ) -> Result<(), crate::Error>;

    /// Get the platform name (for logging/debugging)
    fn platform_name(&self) -> &'static str;
}

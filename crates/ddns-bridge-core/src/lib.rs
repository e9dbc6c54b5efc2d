// # ddns-bridge-core
//
// Core library for the DynDNS to Terraform Cloud bridge.
//
// ## Architecture Overview
//
// A home router reports its public IP using the legacy DynDNS update
// protocol. The bridge terminates TLS, checks Basic credentials, writes the
// IP into a Terraform Cloud workspace variable and queues a run:
//
// - **TlsIdentity**: Embedded certificate/key decoded once at startup
// - **ControlPlane**: Trait for "update variable" and "create run"
// - **UpdateHandler**: `GET /nic/update` protocol handling
// - **BridgeServer**: TLS listener with graceful/forced shutdown
//
// ## Design Principles
//
// 1. **No local state**: Every request re-issues both remote calls
// 2. **Single attempt**: Remote failures are reported, never retried
// 3. **Fixed vocabulary**: Clients only ever see `badauth`, `911`,
//    `good <ip>` or an empty 400
// 4. **Library-First**: The daemon is a thin wrapper over this crate

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod target;
pub mod tls;
pub mod traits;

// Re-export core types for convenience
pub use config::{BridgeConfig, ControlPlaneConfig, Credentials};
pub use error::{Error, Result};
pub use handler::{BasicAuth, UpdateHandler, UpdateResponse};
pub use server::{BridgeServer, ServerState, ShutdownOutcome};
pub use target::ControlPlaneTarget;
pub use tls::TlsIdentity;
pub use traits::ControlPlane;

// # ddns-bridged - DynDNS to Terraform Cloud bridge daemon
//
// This daemon is a THIN integration layer:
// - Reads configuration from environment variables
// - Initializes logging and the tokio runtime
// - Wires the Terraform Cloud client into the update handler
// - Runs the TLS server until SIGINT/SIGTERM
//
// All protocol and lifecycle logic lives in ddns-bridge-core.
//
// ## Configuration
//
// - `UNIFI_USERNAME`: Expected Basic-auth username (required)
// - `UNIFI_PASSWORD`: Expected Basic-auth password (required)
// - `TERRAFORM_CLOUD_API_TOKEN`: Platform API token (required)
// - `TERRAFORM_CLOUD_ADDRESS`: Platform API address (required)
// - `DDNS_BRIDGE_LOG_LEVEL`: trace, debug, info, warn or error (default: info)
//
// ## Example
//
// ```bash
// export UNIFI_USERNAME=unifi
// export UNIFI_PASSWORD=secret
// export TERRAFORM_CLOUD_API_TOKEN=your_token
// export TERRAFORM_CLOUD_ADDRESS=https://app.terraform.io
//
// ddns-bridged
// ```

use anyhow::{Context, Result};
use ddns_bridge_core::{
    BridgeConfig, BridgeServer, ControlPlane, ControlPlaneTarget, ShutdownOutcome, TlsIdentity,
    UpdateHandler,
};
use ddns_control_terraform::TerraformCloudClient;
use std::env;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Embedded self-signed certificate; the router does not verify it
const TLS_CERT: &[u8] = include_bytes!("../tls/cert.pem");
const TLS_KEY: &[u8] = include_bytes!("../tls/key.pem");

const ENV_LOG_LEVEL: &str = "DDNS_BRIDGE_LOG_LEVEL";

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (listener failure)
/// - 3: Shutdown forced after the drain deadline
#[derive(Debug, Clone, Copy)]
enum BridgeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// In-flight requests were cut off at the drain deadline
    ForcedShutdown = 3,
}

impl From<BridgeExitCode> for ExitCode {
    fn from(code: BridgeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match BridgeConfig::from_lookup(|key| env::var(key).ok()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return BridgeExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
    let log_level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return BridgeExitCode::ConfigError.into();
    }

    info!("Starting ddns-bridged");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return BridgeExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let shutdown = match shutdown_signal() {
            Ok(shutdown) => shutdown,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return BridgeExitCode::ConfigError;
            }
        };

        let server = match start_bridge(&config).await {
            Ok(server) => server,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return BridgeExitCode::ConfigError;
            }
        };

        match server.run_until(shutdown).await {
            Ok(ShutdownOutcome::Graceful) => {
                info!("Bridge stopped");
                BridgeExitCode::CleanShutdown
            }
            Ok(ShutdownOutcome::Forced) => {
                warn!("Bridge stopped after forcing connections closed");
                BridgeExitCode::ForcedShutdown
            }
            Err(e) => {
                error!("Server error: {}", e);
                BridgeExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Build every component and bind the listener
async fn start_bridge(config: &BridgeConfig) -> Result<BridgeServer> {
    let identity =
        TlsIdentity::from_pem(TLS_CERT, TLS_KEY).context("failed to load embedded TLS identity")?;
    let tls = identity.server_config()?;

    let control_plane = TerraformCloudClient::connect(&config.control_plane)
        .await
        .context("failed to create Terraform Cloud client")?;
    info!(
        "Control plane: {} at {}",
        control_plane.platform_name(),
        config.control_plane.address
    );

    let handler = UpdateHandler::new(
        config.credentials.clone(),
        Arc::new(control_plane),
        ControlPlaneTarget::dns(),
    );

    let server = BridgeServer::bind(
        config.listen_addr,
        tls,
        handler.into_router(),
        config.drain_timeout,
    )
    .await?;

    Ok(server)
}

/// Future that resolves on SIGTERM or SIGINT
///
/// Must be called inside the runtime, before the server starts.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(async move {
        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!("Received shutdown signal: {}", received);
    })
}

/// Future that resolves on Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal: CTRL-C"),
            Err(e) => error!("Failed to wait for CTRL-C: {}", e),
        }
    })
}

//! Test doubles and common utilities for bridge contract tests
//!
//! This module provides a recording control plane and helpers for running a
//! real TLS server on an ephemeral port.

#![allow(dead_code)]

use ddns_bridge_core::config::Credentials;
use ddns_bridge_core::error::{Error, Result};
use ddns_bridge_core::{
    BridgeServer, ControlPlane, ControlPlaneTarget, ServerState, ShutdownOutcome, TlsIdentity,
    UpdateHandler,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, oneshot, watch};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "unifi";
pub const PASSWORD: &str = "s3cret:with:colons";

const CERT: &[u8] = include_bytes!("../fixtures/cert.pem");
const KEY: &[u8] = include_bytes!("../fixtures/key.pem");

/// A control plane call as observed by [`MockControlPlane`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UpdateVariable {
        workspace_id: String,
        variable_id: String,
        value: String,
    },
    CreateRun {
        workspace_id: String,
        message: String,
        auto_apply: bool,
    },
}

/// A mock ControlPlane that records calls in order
pub struct MockControlPlane {
    /// Calls in the order they were made
    calls: std::sync::Mutex<Vec<Call>>,
    /// Fail update_variable()
    fail_update: AtomicBool,
    /// Fail create_run()
    fail_run: AtomicBool,
    /// When set, update_variable() waits for a permit before returning
    gate: Option<Arc<Semaphore>>,
    /// Notified whenever update_variable() is entered
    update_entered: Arc<Notify>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self {
            calls: std::sync::Mutex::new(Vec::new()),
            fail_update: AtomicBool::new(false),
            fail_run: AtomicBool::new(false),
            gate: None,
            update_entered: Arc::new(Notify::new()),
        }
    }

    /// Create a control plane whose update_variable() blocks until released
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut control_plane = Self::new();
        control_plane.gate = Some(Arc::clone(&gate));
        (control_plane, gate)
    }

    pub fn failing_update(self) -> Self {
        self.fail_update.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_run(self) -> Self {
        self.fail_run.store(true, Ordering::SeqCst);
        self
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Handle that is notified when update_variable() is entered
    pub fn update_entered(&self) -> Arc<Notify> {
        Arc::clone(&self.update_entered)
    }
}

#[async_trait::async_trait]
impl ControlPlane for MockControlPlane {
    async fn update_variable(
        &self,
        workspace_id: &str,
        variable_id: &str,
        value: &str,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(Call::UpdateVariable {
            workspace_id: workspace_id.to_string(),
            variable_id: variable_id.to_string(),
            value: value.to_string(),
        });
        self.update_entered.notify_one();

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        if self.fail_update.load(Ordering::SeqCst) {
            return Err(Error::platform("mock", "update rejected"));
        }
        Ok(())
    }

    async fn create_run(&self, workspace_id: &str, message: &str, auto_apply: bool) -> Result<()> {
        self.calls.lock().unwrap().push(Call::CreateRun {
            workspace_id: workspace_id.to_string(),
            message: message.to_string(),
            auto_apply,
        });

        if self.fail_run.load(Ordering::SeqCst) {
            return Err(Error::platform("mock", "run rejected"));
        }
        Ok(())
    }

    fn platform_name(&self) -> &'static str {
        "mock"
    }
}

/// The two calls a successful request must produce, in order
pub fn expected_calls(ip: &str) -> Vec<Call> {
    let target = ControlPlaneTarget::dns();
    vec![
        Call::UpdateVariable {
            workspace_id: target.workspace_id.to_string(),
            variable_id: target.variable_id.to_string(),
            value: ip.to_string(),
        },
        Call::CreateRun {
            workspace_id: target.workspace_id.to_string(),
            message: target.run_message.to_string(),
            auto_apply: true,
        },
    ]
}

/// Build a handler over a shared mock
pub fn handler(control_plane: &Arc<MockControlPlane>) -> UpdateHandler {
    UpdateHandler::new(
        Credentials::new(USERNAME, PASSWORD),
        Arc::clone(control_plane) as Arc<dyn ControlPlane>,
        ControlPlaneTarget::dns(),
    )
}

/// A bridge server running on an ephemeral local port
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: watch::Receiver<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    pub handle: JoinHandle<Result<ShutdownOutcome>>,
}

impl TestServer {
    pub async fn start(control_plane: &Arc<MockControlPlane>, drain_timeout: Duration) -> Self {
        let identity = TlsIdentity::from_pem(CERT, KEY).expect("fixture identity loads");
        let tls = identity.server_config().expect("fixture identity is valid");

        let server = BridgeServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            tls,
            handler(control_plane).into_router(),
            drain_timeout,
        )
        .await
        .expect("bind succeeds");

        let addr = server.local_addr().expect("listener has an address");
        let mut state = server.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        state
            .wait_for(|s| *s == ServerState::Serving)
            .await
            .expect("server reaches Serving");

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("https://{}{}", self.addr, path_and_query)
    }

    /// Trigger the shutdown future
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// HTTPS client that, like the router, does not verify the certificate
pub fn https_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .build()
        .expect("client builds")
}

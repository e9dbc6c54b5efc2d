//! Configuration types for the DDNS bridge
//!
//! Everything here is read once at startup and then shared read-only.
//! Types holding secrets implement `Debug` by hand so that passwords and
//! tokens never end up in logs.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable holding the expected Basic-auth username
pub const ENV_USERNAME: &str = "UNIFI_USERNAME";
/// Environment variable holding the expected Basic-auth password
pub const ENV_PASSWORD: &str = "UNIFI_PASSWORD";
/// Environment variable holding the control plane API token
pub const ENV_API_TOKEN: &str = "TERRAFORM_CLOUD_API_TOKEN";
/// Environment variable holding the control plane API address
pub const ENV_ADDRESS: &str = "TERRAFORM_CLOUD_ADDRESS";

/// Address the TLS listener binds to
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8443);

/// How long in-flight requests may run after a shutdown signal
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Main bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Credentials the router must present
    pub credentials: Credentials,

    /// Control plane connection settings
    pub control_plane: ControlPlaneConfig,

    /// TLS listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Drain deadline applied on graceful shutdown
    #[serde(default = "default_drain_timeout", with = "duration_secs")]
    pub drain_timeout: Duration,
}

impl BridgeConfig {
    /// Create a configuration with the default listener settings
    pub fn new(credentials: Credentials, control_plane: ControlPlaneConfig) -> Self {
        Self {
            credentials,
            control_plane,
            listen_addr: DEFAULT_LISTEN_ADDR,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Build the configuration from a key lookup
    ///
    /// The daemon passes a closure over `std::env::var`. A key that is
    /// missing or empty is a fatal error naming the key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, crate::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, crate::Error> {
            match lookup(key) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => Err(crate::Error::config(format!("{key} must be provided"))),
            }
        };

        let config = Self::new(
            Credentials::new(required(ENV_USERNAME)?, required(ENV_PASSWORD)?),
            ControlPlaneConfig::new(required(ENV_ADDRESS)?, required(ENV_API_TOKEN)?),
        );
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.credentials.validate()?;
        self.control_plane.validate()?;

        if self.drain_timeout.is_zero() {
            return Err(crate::Error::config("Drain timeout must be > 0"));
        }

        Ok(())
    }
}

/// Expected Basic-auth credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Expected username
    pub username: String,
    /// Expected password
    pub password: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check a supplied pair against the expected one
    ///
    /// Compares raw bytes, so a supplied pair that is not valid UTF-8 never
    /// matches.
    pub fn matches(&self, username: &[u8], password: &[u8]) -> bool {
        self.username.as_bytes() == username && self.password.as_bytes() == password
    }

    /// Validate the credential pair
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.username.is_empty() {
            return Err(crate::Error::config("Username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(crate::Error::config("Password cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Control plane connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// API address, e.g. `https://app.terraform.io`
    pub address: String,
    /// API token
    pub api_token: String,
}

impl ControlPlaneConfig {
    /// Create control plane settings
    pub fn new(address: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            api_token: api_token.into(),
        }
    }

    /// Validate the control plane settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.address.is_empty() {
            return Err(crate::Error::config("Control plane address cannot be empty"));
        }
        if self.api_token.is_empty() {
            return Err(crate::Error::config("Control plane API token cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ControlPlaneConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneConfig")
            .field("address", &self.address)
            .field("api_token", &"<REDACTED>")
            .finish()
    }
}

fn default_listen_addr() -> SocketAddr {
    DEFAULT_LISTEN_ADDR
}

fn default_drain_timeout() -> Duration {
    DEFAULT_DRAIN_TIMEOUT
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

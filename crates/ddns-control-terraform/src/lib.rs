// # Terraform Cloud Control Plane
//
// This crate provides the Terraform Cloud (and Terraform Enterprise)
// implementation of `ControlPlane` for the DynDNS bridge.
//
// ## Behaviour
//
// - One HTTP request per trait call, no retries, no caching
// - Typed errors for HTTP status codes (401, 403, 404, 429, 5xx)
// - Identifiers validated locally before any request is made
// - Response bodies are not parsed; success is decided by status alone
// - No client-side request timeout: a hung call is bounded only by the
//   server's drain deadline
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - API token MUST be provided via environment variables only
// - Client construction fails fast if the token is empty
//
// ## API Reference
//
// - Terraform Cloud API v2: https://developer.hashicorp.com/terraform/cloud-docs/api-docs
// - Update Variable: PATCH `/workspaces/:workspace_id/vars/:variable_id`
// - Create Run: POST `/runs`
// - Health check: GET `/ping`

use async_trait::async_trait;
use ddns_bridge_core::config::ControlPlaneConfig;
use ddns_bridge_core::traits::ControlPlane;
use ddns_bridge_core::{Error, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

/// Platform name reported in errors and logs
const PLATFORM: &str = "terraform-cloud";

/// Path prefix of the v2 API below the configured address
const API_BASE_PATH: &str = "/api/v2";

/// Media type required by the JSON:API endpoints
const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// Terraform Cloud API client
///
/// Stateless apart from the pooled HTTP client; safe to share across
/// concurrent requests behind an `Arc`.
pub struct TerraformCloudClient {
    /// API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// `{address}/api/v2`, without a trailing slash
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for TerraformCloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformCloudClient")
            .field("api_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TerraformCloudClient {
    /// Create a client without contacting the API
    ///
    /// # Parameters
    ///
    /// - `address`: API address, e.g. `https://app.terraform.io`
    /// - `api_token`: User or team API token
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the token is empty or the address is not
    /// an absolute `http`/`https` URL.
    pub fn new(address: &str, api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Terraform Cloud API token cannot be empty"));
        }

        let url = Url::parse(address)
            .map_err(|e| Error::config(format!("invalid Terraform Cloud address {address:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "invalid Terraform Cloud address {address:?}: scheme must be http or https"
            )));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_token,
            base_url: format!("{}{}", address.trim_end_matches('/'), API_BASE_PATH),
            client,
        })
    }

    /// Create a client from validated bridge configuration
    pub fn from_config(config: &ControlPlaneConfig) -> Result<Self> {
        Self::new(&config.address, config.api_token.as_str())
    }

    /// Create a client and verify the API is reachable
    ///
    /// A wrong address or unreachable platform fails here, at startup,
    /// rather than on the first update request.
    pub async fn connect(config: &ControlPlaneConfig) -> Result<Self> {
        let client = Self::from_config(config)?;
        client.ping().await?;
        Ok(client)
    }

    /// Probe `GET /api/v2/ping`
    pub async fn ping(&self) -> Result<()> {
        let request = self.request(self.client.get(self.url("/ping")));
        self.send(request, "ping").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_token)
            .header(ACCEPT, JSONAPI_MEDIA_TYPE)
            .header(CONTENT_TYPE, JSONAPI_MEDIA_TYPE)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("{action} request failed: {e}")))?;

        check_status(response, action).await
    }
}

#[async_trait]
impl ControlPlane for TerraformCloudClient {
    async fn update_variable(
        &self,
        workspace_id: &str,
        variable_id: &str,
        value: &str,
    ) -> Result<()> {
        validate_id("workspace", workspace_id)?;
        validate_id("variable", variable_id)?;

        let body = Document {
            data: VariableResource {
                kind: "vars",
                id: variable_id,
                attributes: VariableAttributes { value },
            },
        };

        debug!(workspace_id, variable_id, "Updating workspace variable");

        let path = format!("/workspaces/{workspace_id}/vars/{variable_id}");
        let request = self.request(self.client.patch(self.url(&path))).json(&body);
        self.send(request, "variable update").await
    }

    async fn create_run(&self, workspace_id: &str, message: &str, auto_apply: bool) -> Result<()> {
        validate_id("workspace", workspace_id)?;

        let body = Document {
            data: RunResource {
                kind: "runs",
                attributes: RunAttributes {
                    message,
                    auto_apply,
                },
                relationships: RunRelationships {
                    workspace: Document {
                        data: ResourceIdentifier {
                            kind: "workspaces",
                            id: workspace_id,
                        },
                    },
                },
            },
        };

        debug!(workspace_id, auto_apply, "Creating run");

        let request = self.request(self.client.post(self.url("/runs"))).json(&body);
        self.send(request, "run creation").await
    }

    fn platform_name(&self) -> &'static str {
        PLATFORM
    }
}

#[derive(Serialize)]
struct Document<T> {
    data: T,
}

#[derive(Serialize)]
struct VariableResource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    attributes: VariableAttributes<'a>,
}

#[derive(Serialize)]
struct VariableAttributes<'a> {
    value: &'a str,
}

#[derive(Serialize)]
struct RunResource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: RunAttributes<'a>,
    relationships: RunRelationships<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct RunAttributes<'a> {
    message: &'a str,
    auto_apply: bool,
}

#[derive(Serialize)]
struct RunRelationships<'a> {
    workspace: Document<ResourceIdentifier<'a>>,
}

#[derive(Serialize)]
struct ResourceIdentifier<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
}

/// Reject identifiers that would not form a single path segment
fn validate_id(kind: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("invalid {kind} ID: {id:?}")))
    }
}

/// Map a non-success status to a typed error
async fn check_status(response: Response, action: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::auth(format!(
            "{action} rejected: invalid API token or insufficient permissions. Status: {status}"
        ))),
        StatusCode::NOT_FOUND => Err(Error::not_found(format!(
            "{action} failed: resource not found. Status: {status}"
        ))),
        StatusCode::TOO_MANY_REQUESTS => Err(Error::rate_limited(format!(
            "{action} failed: rate limit exceeded. Status: {status}"
        ))),
        s if s.is_server_error() => Err(Error::platform(
            PLATFORM,
            format!("{action} failed: server error (transient). Status: {status}"),
        )),
        _ => Err(Error::platform(
            PLATFORM,
            format!("{action} failed. Status: {status}"),
        )),
    }
}

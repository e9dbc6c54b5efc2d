//! DynDNS update handler
//!
//! Implements the `GET /nic/update` endpoint of the DynDNS update protocol:
//!
//! ```text
//! no Basic auth            -> 400, empty body
//! wrong credentials        -> 200 "badauth"
//! missing/empty myip       -> 200 "911"
//! update_variable fails    -> 200 "911"   (run never triggered)
//! create_run fails         -> 200 "911"
//! both succeed             -> 200 "good <myip>"
//! ```
//!
//! Credentials are always checked before the control plane is touched and
//! the two remote calls run strictly in order. Nothing is cached, so the
//! same IP reported twice produces two full update/run sequences.
//!
//! Query pairs holding a `;` or a malformed `%` escape are dropped, `+` is
//! a space, and the first `myip` wins. The value is kept as raw bytes so the `good`
//! response echoes exactly what was decoded.

use crate::config::Credentials;
use crate::target::ControlPlaneTarget;
use crate::traits::ControlPlane;
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::percent_decode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Path of the update endpoint
pub const UPDATE_PATH: &str = "/nic/update";

/// Query parameter carrying the claimed IP
pub const MYIP_PARAM: &str = "myip";

const BASIC_PREFIX: &[u8] = b"Basic ";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Protocol outcome of a single update request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResponse {
    /// No usable Basic credentials (HTTP 400, empty body)
    Malformed,
    /// Credentials did not match
    BadAuth,
    /// Missing IP or any control plane failure
    Failure,
    /// IP accepted; carries the decoded `myip` bytes
    Good(Vec<u8>),
}

impl UpdateResponse {
    /// HTTP status for this outcome
    pub fn status(&self) -> StatusCode {
        match self {
            UpdateResponse::Malformed => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    }

    /// Literal response body
    pub fn body(&self) -> Vec<u8> {
        match self {
            UpdateResponse::Malformed => Vec::new(),
            UpdateResponse::BadAuth => b"badauth".to_vec(),
            UpdateResponse::Failure => b"911".to_vec(),
            UpdateResponse::Good(ip) => [b"good ".as_slice(), ip.as_slice()].concat(),
        }
    }
}

impl IntoResponse for UpdateResponse {
    fn into_response(self) -> Response {
        match self {
            UpdateResponse::Malformed => StatusCode::BAD_REQUEST.into_response(),
            other => (
                other.status(),
                [(header::CONTENT_TYPE, TEXT_PLAIN)],
                other.body(),
            )
                .into_response(),
        }
    }
}

/// Basic credentials supplied by the client, as decoded bytes
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

impl BasicAuth {
    /// Extract Basic credentials from request headers
    ///
    /// Returns `None` unless the `Authorization` header uses the `Basic`
    /// scheme (any case), carries valid standard base64 and the decoded
    /// bytes contain a `:`. The password is everything after the first `:`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(header::AUTHORIZATION)?.as_bytes();
        if value.len() < BASIC_PREFIX.len()
            || !value[..BASIC_PREFIX.len()].eq_ignore_ascii_case(BASIC_PREFIX)
        {
            return None;
        }

        let mut decoded = STANDARD.decode(&value[BASIC_PREFIX.len()..]).ok()?;
        let colon = decoded.iter().position(|&b| b == b':')?;
        let password = decoded.split_off(colon + 1);
        decoded.truncate(colon);

        Some(Self {
            username: decoded,
            password,
        })
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Validates update requests and drives the control plane
///
/// Cheap to clone; all clones share the same credentials and client.
#[derive(Clone)]
pub struct UpdateHandler {
    credentials: Arc<Credentials>,
    control_plane: Arc<dyn ControlPlane>,
    target: ControlPlaneTarget,
}

impl UpdateHandler {
    /// Create a handler
    ///
    /// # Parameters
    ///
    /// - `credentials`: Credentials the router must present
    /// - `control_plane`: Platform receiving the IP
    /// - `target`: Workspace/variable binding to update
    pub fn new(
        credentials: Credentials,
        control_plane: Arc<dyn ControlPlane>,
        target: ControlPlaneTarget,
    ) -> Self {
        Self {
            credentials: Arc::new(credentials),
            control_plane,
            target,
        }
    }

    /// Run the update protocol for one request
    ///
    /// # Parameters
    ///
    /// - `auth`: Parsed Basic credentials, `None` when absent or malformed
    /// - `myip`: First decoded `myip` query value, if any
    pub async fn handle(&self, auth: Option<BasicAuth>, myip: Option<Vec<u8>>) -> UpdateResponse {
        let Some(auth) = auth else {
            debug!("Update request without Basic credentials");
            return UpdateResponse::Malformed;
        };

        if !self.credentials.matches(&auth.username, &auth.password) {
            warn!(
                "Rejected update request for user '{}': bad credentials",
                String::from_utf8_lossy(&auth.username)
            );
            return UpdateResponse::BadAuth;
        }

        let Some(ip) = myip.filter(|ip| !ip.is_empty()) else {
            warn!("Update request without {} parameter", MYIP_PARAM);
            return UpdateResponse::Failure;
        };
        let value = String::from_utf8_lossy(&ip);

        if let Err(e) = self
            .control_plane
            .update_variable(self.target.workspace_id, self.target.variable_id, &value)
            .await
        {
            warn!(
                "Failed to update variable {} on {}: {}",
                self.target.variable_id,
                self.control_plane.platform_name(),
                e
            );
            return UpdateResponse::Failure;
        }

        if let Err(e) = self
            .control_plane
            .create_run(
                self.target.workspace_id,
                self.target.run_message,
                self.target.auto_apply,
            )
            .await
        {
            warn!(
                "Failed to trigger run for workspace {} on {}: {}",
                self.target.workspace_id,
                self.control_plane.platform_name(),
                e
            );
            return UpdateResponse::Failure;
        }

        info!(myip = %value, "success");
        UpdateResponse::Good(ip)
    }

    /// Build the HTTP router serving [`UPDATE_PATH`]
    pub fn into_router(self) -> Router {
        Router::new()
            .route(UPDATE_PATH, get(nic_update))
            .with_state(self)
    }
}

async fn nic_update(
    State(handler): State<UpdateHandler>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> UpdateResponse {
    let auth = BasicAuth::from_headers(&headers);
    let myip = query.and_then(|query| query_value(&query, MYIP_PARAM));

    handler.handle(auth, myip).await
}

/// First decoded value of `name` in a raw query string
fn query_value(query: &str, name: &str) -> Option<Vec<u8>> {
    query.split('&').find_map(|pair| {
        if pair.is_empty() || pair.contains(';') {
            return None;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = unescape(key)?;
        let value = unescape(value)?;
        (key == name.as_bytes()).then_some(value)
    })
}

/// Decode one query component, `None` on a malformed `%` escape
fn unescape(component: &str) -> Option<Vec<u8>> {
    let bytes = component.as_bytes();
    let malformed = bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !(bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit))
    });
    if malformed {
        return None;
    }

    let spaced: Vec<u8> = bytes
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    Some(percent_decode(&spaced).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::Engine as _;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(credentials: &str) -> HeaderMap {
        headers_with(&format!("Basic {}", STANDARD.encode(credentials)))
    }

    #[test]
    fn test_basic_auth_parses_user_and_password() {
        let auth = BasicAuth::from_headers(&basic("router:hunter2")).unwrap();

        assert_eq!(auth.username, b"router");
        assert_eq!(auth.password, b"hunter2");
    }

    #[test]
    fn test_basic_auth_password_may_contain_colons() {
        let auth = BasicAuth::from_headers(&basic("router:a:b:c")).unwrap();

        assert_eq!(auth.username, b"router");
        assert_eq!(auth.password, b"a:b:c");
    }

    #[test]
    fn test_basic_auth_scheme_is_case_insensitive() {
        let encoded = STANDARD.encode("router:hunter2");
        let auth = BasicAuth::from_headers(&headers_with(&format!("bAsIc {encoded}")));

        assert!(auth.is_some());
    }

    #[test]
    fn test_basic_auth_empty_fields_still_present() {
        let auth = BasicAuth::from_headers(&basic(":")).unwrap();

        assert!(auth.username.is_empty());
        assert!(auth.password.is_empty());
    }

    #[test]
    fn test_basic_auth_keeps_non_utf8_bytes() {
        let encoded = STANDARD.encode(b"router:pass\xFF");
        let auth = BasicAuth::from_headers(&headers_with(&format!("Basic {encoded}"))).unwrap();

        assert_eq!(auth.password, b"pass\xFF");
    }

    #[test]
    fn test_basic_auth_absent_or_malformed() {
        assert!(BasicAuth::from_headers(&HeaderMap::new()).is_none());
        assert!(BasicAuth::from_headers(&headers_with("Bearer abc")).is_none());
        assert!(BasicAuth::from_headers(&headers_with("Basic")).is_none());
        assert!(BasicAuth::from_headers(&headers_with("Basic !!notbase64")).is_none());
        // Decodes fine but has no separator
        assert!(BasicAuth::from_headers(&basic("routerhunter2")).is_none());
    }

    #[test]
    fn test_response_bodies() {
        assert_eq!(UpdateResponse::Malformed.status(), StatusCode::BAD_REQUEST);
        assert!(UpdateResponse::Malformed.body().is_empty());
        assert_eq!(UpdateResponse::BadAuth.body(), b"badauth");
        assert_eq!(UpdateResponse::Failure.body(), b"911");
        assert_eq!(
            UpdateResponse::Good(b"203.0.113.7".to_vec()).body(),
            b"good 203.0.113.7"
        );
        assert_eq!(UpdateResponse::Failure.status(), StatusCode::OK);
    }

    #[test]
    fn test_query_value_takes_first_match() {
        assert_eq!(
            query_value("hostname=h&myip=1.2.3.4&myip=5.6.7.8", "myip"),
            Some(b"1.2.3.4".to_vec())
        );
        assert_eq!(query_value("myip=&myip=1.2.3.4", "myip"), Some(Vec::new()));
        assert_eq!(query_value("myip", "myip"), Some(Vec::new()));
        assert_eq!(query_value("hostname=h", "myip"), None);
    }

    #[test]
    fn test_query_value_decodes_escapes_and_plus() {
        assert_eq!(
            query_value("my%69p=2001%3adb8%3A%3A1", "myip"),
            Some(b"2001:db8::1".to_vec())
        );
        assert_eq!(query_value("myip=a+b%2B", "myip"), Some(b"a b+".to_vec()));
        assert_eq!(query_value("myip=%FF", "myip"), Some(vec![0xFF]));
    }

    #[test]
    fn test_query_value_skips_malformed_pairs() {
        for query in ["myip=%zz", "myip=%", "myip=%4", "myip=1.2.3.4;x=y", "my%ip=1.2.3.4"] {
            assert_eq!(query_value(query, "myip"), None, "query {query:?}");
        }

        // A later well-formed pair still counts
        assert_eq!(
            query_value("myip=%zz&myip=1.2.3.4", "myip"),
            Some(b"1.2.3.4".to_vec())
        );
    }

    #[test]
    fn test_password_not_exposed_in_debug() {
        let auth = BasicAuth::from_headers(&basic("router:hunter2")).unwrap();
        let debug_str = format!("{:?}", auth);

        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("router"));
    }
}

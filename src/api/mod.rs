//! Wire types shared between the router and the backend services.
//!
//! The router never interprets a backend's business payloads. It only needs
//! the declarations a service publishes about itself (its [`ServiceBundle`]),
//! the distribution message it pushes back ([`ServiceConfig`]), the forwarded
//! HTTP envelope and the authenticator exchange.

pub mod codec;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub use codec::{AreaType, ConfigureAuth, ConfigureUrl, ResourceConfig};

/// Declared kind of a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "solidcoredata.org/resource/auth")]
    Auth,
    #[serde(rename = "solidcoredata.org/resource/url")]
    Url,
    #[serde(rename = "solidcoredata.org/resource/spa-code")]
    SpaCode,
    #[serde(rename = "solidcoredata.org/resource/query")]
    Query,
}

impl ResourceType {
    pub fn is_none(&self) -> bool {
        *self == ResourceType::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::None => "",
            ResourceType::Auth => "solidcoredata.org/resource/auth",
            ResourceType::Url => "solidcoredata.org/resource/url",
            ResourceType::SpaCode => "solidcoredata.org/resource/spa-code",
            ResourceType::Query => "solidcoredata.org/resource/query",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Login state reported by an authenticator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoginState {
    #[default]
    Missing,
    Error,
    None,
    Granted,
    U2F,
    ChangePassword,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            LoginState::Missing => "Missing",
            LoginState::Error => "Error",
            LoginState::None => "None",
            LoginState::Granted => "Granted",
            LoginState::U2F => "U2F",
            LoginState::ChangePassword => "ChangePassword",
        };
        f.write_str(state)
    }
}

/// A resource as declared by a service, or as distributed by the router.
///
/// In a [`ServiceBundle`] `name` is local to the service. `parent` and
/// `include` always carry fully qualified names (`<service>/<name>`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default, rename = "type")]
    pub r#type: ResourceType,
    #[serde(default)]
    pub consume: ResourceType,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default, with = "codec::base64_bytes")]
    pub configuration: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginBundleDecl {
    pub login_state: LoginState,
    pub prefix: String,
    #[serde(default)]
    pub consume_redirect: bool,
    /// Qualified name of the bundle resource.
    pub resource: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationBundle {
    pub hosts: Vec<String>,
    /// Qualified name of the authenticator resource.
    pub auth_resource: String,
    #[serde(default)]
    pub login_bundles: Vec<LoginBundleDecl>,
}

/// Everything a service declares about itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceBundle {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub applications: Vec<ApplicationBundle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceConfigAction {
    Add,
    Remove,
}

impl fmt::Display for ServiceConfigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceConfigAction::Add => f.write_str("Add"),
            ServiceConfigAction::Remove => f.write_str("Remove"),
        }
    }
}

/// Resources a destination can reach at one provider endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfigEndpoint {
    pub name: String,
    pub endpoint: String,
    pub resources: Vec<Resource>,
}

/// Distribution message pushed from the router to one destination service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub version: String,
    pub action: ServiceConfigAction,
    #[serde(default)]
    pub list: Vec<ServiceConfigEndpoint>,
}

/// Multi-valued string map used for headers and query values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValueList {
    pub values: BTreeMap<String, Vec<String>>,
}

impl KeyValueList {
    pub fn add(&mut self, key: &str, value: &str) {
        self.values
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|list| list.first())
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Url {
    /// Name of the service the request is routed to.
    pub host: String,
    /// Local name of the handling resource within that service.
    pub path: String,
    pub query: KeyValueList,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsState {
    pub version: String,
    pub cipher_suite: String,
    #[serde(default)]
    pub server_name: String,
}

/// Request forwarded from the router to the service owning a resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub version: String,
    pub method: String,
    pub url: Url,
    pub proto_major: u32,
    pub proto_minor: u32,
    #[serde(default, with = "codec::base64_bytes")]
    pub body: Vec<u8>,
    pub header: KeyValueList,
    pub content_type: String,
    pub host: String,
    pub remote_addr: String,
    pub tls: Option<TlsState>,
    pub auth: Option<RequestAuthResp>,
    pub config: Option<ConfigureUrl>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub header: KeyValueList,
    #[serde(default, with = "codec::base64_bytes")]
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestAuthReq {
    pub token: String,
    pub configuration: Option<ConfigureAuth>,
}

/// Result of authenticating one session token.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestAuthResp {
    pub login_state: LoginState,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub roles: Vec<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub valid_until: Option<i64>,
    #[serde(default)]
    pub elevated_until: Option<i64>,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub email: String,
    /// Name of the session cookie for the requested host, set by the router.
    #[serde(default)]
    pub token_key: String,
}

/// Notification a service sends to announce where it can be reached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotifyReq {
    pub service_address: String,
}

/// Structured status codes carried by remote-call failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
}

/// Body of a failed remote call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

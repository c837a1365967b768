//! The remote-call seam between the router and backend services.
//!
//! Every call the router makes to a service goes through [`ServiceClient`],
//! and every connection is produced by a [`Connector`]. The HTTP/JSON
//! implementation lives in [`http`]; tests swap in in-memory doubles.

pub mod http;
pub mod notify;
pub mod wiring;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::api::{
    Code, HttpRequest, HttpResponse, RequestAuthReq, RequestAuthResp, ServiceBundle,
    ServiceConfig, Status,
};

pub use self::http::HttpConnector;
pub use notify::{register_on_router, Backoff};
pub use wiring::{VersionedWiring, WiredResource};

/// Bundle declarations pushed by a service, first one immediately.
pub type BundleStream = BoxStream<'static, Result<ServiceBundle, RemoteError>>;

/// Failure of a remote call.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteError {
    /// The remote side answered with a structured status.
    Status(Status),
    /// The call never produced a structured answer.
    Transport(String),
}

impl RemoteError {
    pub fn status(code: Code, message: &str) -> Self {
        RemoteError::Status(Status {
            code,
            message: message.to_string(),
        })
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Status(status) => write!(f, "{:?}: {}", status.code, status.message),
            RemoteError::Transport(msg) => write!(f, "transport: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Calls the router makes on one backend service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Delivers an Add or Remove distribution message.
    async fn update_service_config(&self, config: ServiceConfig) -> Result<(), RemoteError>;

    /// Forwards one client request to a resource handler.
    async fn serve_http(&self, req: HttpRequest) -> Result<HttpResponse, RemoteError>;

    /// Authenticates a session token.
    async fn request_auth(&self, req: RequestAuthReq) -> Result<RequestAuthResp, RemoteError>;

    /// Opens the long lived bundle subscription.
    async fn subscribe_bundles(&self) -> Result<BundleStream, RemoteError>;
}

/// Produces clients for service addresses.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ServiceClient>, RemoteError>;
}

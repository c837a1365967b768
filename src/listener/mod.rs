//! Registration listener.
//!
//! Backends announce themselves with `POST /notify`. The router dials the
//! announced address back and keeps one subscription task per service; the
//! service stays registered for exactly as long as that stream stays open.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use http::{Method, Response, StatusCode};
use matchit::{Match, Router};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};

use crate::{
    api::NotifyReq,
    registry::ServiceRegistry,
    transport::Connector,
    utils::response::ResponseBuilder,
};

/// Opens and follows bundle subscriptions.
pub struct Subscriber {
    registry: Arc<ServiceRegistry>,
    connector: Arc<dyn Connector>,
}

impl Subscriber {
    pub fn new(registry: Arc<ServiceRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// Follows the subscription of the service at `address` until it ends.
    ///
    /// Every bundle received replaces the service's declaration. When the
    /// stream closes, for any reason, the service is removed.
    pub async fn subscribe(&self, address: String) {
        let client = match self.connector.dial(&address).await {
            Ok(client) => client,
            Err(e) => {
                log::warn!("unable to dial service at {address}: {e}");
                return;
            }
        };
        let mut stream = match client.subscribe_bundles().await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("unable to subscribe to service at {address}: {e}");
                return;
            }
        };

        let subscription = self.registry.new_subscription();
        log::info!("subscription {subscription} opened to {address}");

        let mut name: Option<String> = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(bundle) => {
                    let declared = bundle.name.clone();
                    match self
                        .registry
                        .update(subscription, &address, client.clone(), bundle)
                    {
                        Ok(()) => name = Some(declared),
                        Err(e) => log::warn!("bundle from {address} ignored: {e}"),
                    }
                }
                Err(e) => {
                    log::warn!("subscription to {address} failed: {e}");
                    break;
                }
            }
        }

        log::info!("subscription {subscription} to {address} closed");
        if let Some(name) = name {
            self.registry.remove(&name, subscription);
        }
    }

    pub fn spawn(self: &Arc<Self>, address: String) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.subscribe(address).await })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Endpoint {
    Notify,
}

/// Control-plane HTTP application accepting service notifications.
pub struct RegistrationHttpApp {
    subscriber: Arc<Subscriber>,
    router: Router<HashMap<Method, Endpoint>>,
}

impl RegistrationHttpApp {
    pub fn new(subscriber: Arc<Subscriber>) -> Self {
        let mut router = Router::new();
        let mut notify = HashMap::new();
        notify.insert(Method::POST, Endpoint::Notify);
        if let Err(e) = router.insert("/notify", notify) {
            log::error!("failed to register /notify route: {e}");
        }
        Self { subscriber, router }
    }

    pub fn registration_http_service(
        address: &SocketAddr,
        subscriber: Arc<Subscriber>,
    ) -> Service<Self> {
        let app = Self::new(subscriber);
        let mut service = Service::new("Registration HTTP".to_string(), app);
        service.add_tcp(&address.to_string());
        service
    }

    fn endpoint(&self, path: &str, method: &Method) -> Result<Endpoint, StatusCode> {
        match self.router.at(path) {
            Ok(Match { value, .. }) => value
                .get(method)
                .copied()
                .ok_or(StatusCode::METHOD_NOT_ALLOWED),
            Err(_) => Err(StatusCode::NOT_FOUND),
        }
    }

    fn notify(&self, body: &[u8]) -> Response<Vec<u8>> {
        let req: NotifyReq = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(e) => {
                return ResponseBuilder::error_http(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid notify request: {e}"),
                )
            }
        };
        if req.service_address.is_empty() {
            return ResponseBuilder::error_http(StatusCode::BAD_REQUEST, "service address required");
        }

        log::info!("service at {} notified", req.service_address);
        self.subscriber.spawn(req.service_address);
        ResponseBuilder::json(StatusCode::OK, &serde_json::json!({}))
    }
}

#[async_trait]
impl ServeHttp for RegistrationHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);

        let (path, method) = {
            let req_header = http_session.req_header();
            (req_header.uri.path().to_string(), req_header.method.clone())
        };

        match self.endpoint(&path, &method) {
            Ok(Endpoint::Notify) => match read_request_body(http_session).await {
                Ok(body) => self.notify(&body),
                Err(e) => ResponseBuilder::error_http(StatusCode::BAD_REQUEST, &e.to_string()),
            },
            Err(status) => ResponseBuilder::error_http(status, status.canonical_reason().unwrap_or_default()),
        }
    }
}

async fn read_request_body(http_session: &mut ServerSession) -> pingora_error::Result<Vec<u8>> {
    let mut body_data = Vec::new();
    while let Some(bytes) = http_session.read_request_body().await? {
        body_data.extend_from_slice(&bytes);
    }
    Ok(body_data)
}

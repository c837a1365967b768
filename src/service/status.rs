use std::net::SocketAddr;

use async_trait::async_trait;
use http::{Response, StatusCode};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};
use serde::Serialize;

use crate::{
    rollout::{LiveRouter, RolloutReport},
    utils::response::ResponseBuilder,
};

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct RouterResponse {
    version: Option<String>,
    services: Vec<String>,
    hosts: Vec<String>,
    last_rollout: RolloutReport,
}

/// HTTP application for the readiness check and the live router summary.
///
/// `/status/ready` answers 200 once a router run is live and 503 before.
/// `/status/router` describes the live run and the most recent rollout.
pub struct StatusHttpApp {
    live: LiveRouter,
}

impl StatusHttpApp {
    pub fn new(live: LiveRouter) -> Self {
        Self { live }
    }

    pub fn status_http_service(address: &SocketAddr, live: LiveRouter) -> Service<Self> {
        let app = Self::new(live);
        let mut service = Service::new("Status HTTP".to_string(), app);
        service.add_tcp(&address.to_string());
        service
    }

    fn handle(&self, path: &str) -> Response<Vec<u8>> {
        match path {
            "/status/ready" => self.ready(),
            "/status/router" => self.router(),
            _ => ResponseBuilder::error_http(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn ready(&self) -> Response<Vec<u8>> {
        match self.live.version() {
            Some(version) => ResponseBuilder::json(
                StatusCode::OK,
                &StatusResponse {
                    status: "ok".to_string(),
                    version: Some(version),
                    error: None,
                },
            ),
            None => ResponseBuilder::json(
                StatusCode::SERVICE_UNAVAILABLE,
                &StatusResponse {
                    status: "error".to_string(),
                    version: None,
                    error: Some("no router version is live yet".to_string()),
                },
            ),
        }
    }

    fn router(&self) -> Response<Vec<u8>> {
        let run = self.live.load();
        let (version, services, mut hosts) = match &run {
            Some(run) => (
                Some(run.version.clone()),
                run.services.iter().map(|s| s.name.clone()).collect(),
                run.hosts.keys().cloned().collect::<Vec<_>>(),
            ),
            None => (None, Vec::new(), Vec::new()),
        };
        hosts.sort();

        ResponseBuilder::json(
            StatusCode::OK,
            &RouterResponse {
                version,
                services,
                hosts,
                last_rollout: self.live.report().as_ref().clone(),
            },
        )
    }
}

#[async_trait]
impl ServeHttp for StatusHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);

        let path = http_session.req_header().uri.path().to_string();
        self.handle(&path)
    }
}

//! Request dispatcher.
//!
//! `lookup host → authenticate → select login bundle → redirect policy →
//! resolve path → forward → render`. Every step reads the run that was live
//! when the request arrived; a rollout mid-request does not affect it.

pub mod http;
pub mod redirect;

use std::{sync::Arc, time::Instant};

use ::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Uri, Version};
use url::form_urlencoded;

use crate::{
    api::{self, Code, HttpRequest, HttpResponse, KeyValueList, LoginState, RequestAuthReq, RequestAuthResp, TlsState},
    graph::{AppIdx, RouterRun, UrlRoute},
    metrics::FORWARD_LATENCY,
    rollout::LiveRouter,
    transport::RemoteError,
    utils::{
        request::{get_cookie_value, get_header_value, get_request_host},
        response::ResponseBuilder,
    },
};

use redirect::Redirect;

pub use self::http::DispatchHttpApp;

/// Transport neutral view of a client request.
#[derive(Clone, Debug)]
pub struct ClientRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub remote_addr: String,
    pub tls: Option<TlsState>,
}

impl ClientRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers,
            body: Vec::new(),
            remote_addr: String::new(),
            tls: None,
        }
    }

    fn host(&self) -> &str {
        get_request_host(&self.uri, &self.headers).unwrap_or_default()
    }

    fn proto(&self) -> (u32, u32) {
        match self.version {
            Version::HTTP_09 => (0, 9),
            Version::HTTP_10 => (1, 0),
            Version::HTTP_2 => (2, 0),
            Version::HTTP_3 => (3, 0),
            _ => (1, 1),
        }
    }
}

/// A request that passed authentication, redirect policy and path lookup.
pub struct Routed {
    run: Arc<RouterRun>,
    app: AppIdx,
    route: UrlRoute,
    auth: RequestAuthResp,
    pub state: LoginState,
}

#[derive(Clone)]
pub struct Dispatcher {
    live: LiveRouter,
}

fn error(status: StatusCode, message: &str) -> Response<Vec<u8>> {
    ResponseBuilder::error_http(status, message)
}

impl Dispatcher {
    pub fn new(live: LiveRouter) -> Self {
        Self { live }
    }

    /// Runs every step up to the forward call.
    ///
    /// `Err` carries the response to send instead: an error or a redirect.
    pub async fn route(&self, req: &ClientRequest) -> Result<Routed, Response<Vec<u8>>> {
        let Some(run) = self.live.load() else {
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "not configured"));
        };

        let host = req.host();
        let Some((token, app)) = run.app_for_host(host) else {
            log::debug!("no application for host {host:?}");
            return Err(error(StatusCode::NOT_FOUND, "host record not found"));
        };

        let Some(binding) = &app.auth else {
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "auth not configured"));
        };
        let session = get_cookie_value(&req.headers, &token.token_key).unwrap_or_default();
        let authenticator = &run.service(binding.service).client;
        let mut auth = authenticator
            .request_auth(RequestAuthReq {
                token: session.to_string(),
                configuration: Some(binding.config.clone()),
            })
            .await
            .map_err(|e| {
                log::warn!("auth request for {host} failed: {e}");
                error(StatusCode::INTERNAL_SERVER_ERROR, &format!("auth: {e}"))
            })?;
        auth.token_key = token.token_key.clone();

        let state = auth.login_state;
        let Some(lb) = app.login_bundles.get(&state) else {
            return Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("unconfigured login state: {state}"),
            ));
        };
        if lb.bundle.is_none() {
            return Err(error(
                StatusCode::NOT_FOUND,
                &format!("no bundle for login state {state}"),
            ));
        }

        if let Redirect::To(location) = redirect::apply(&lb.prefix, lb.consume_redirect, &req.uri) {
            log::debug!("{host}{} redirected to {location} in state {state}", req.uri.path());
            return Err(ResponseBuilder::redirect(&location));
        }

        let path = strip_prefix(req.uri.path(), &lb.prefix);
        let Some(route) = lb.url_router.get(path) else {
            return Err(error(StatusCode::NOT_FOUND, &format!("path not found {path:?}")));
        };

        let route = route.clone();
        let app = token.app;
        Ok(Routed {
            run,
            app,
            route,
            auth,
            state,
        })
    }

    /// Forwards a routed request, with its body, to the handling service.
    pub async fn forward(&self, routed: Routed, req: ClientRequest) -> Response<Vec<u8>> {
        let Routed {
            run,
            app,
            route,
            auth,
            state: _,
        } = routed;

        let (proto_major, proto_minor) = req.proto();
        let host = get_header_value(&req.headers, header::HOST.as_str())
            .unwrap_or_else(|| req.host())
            .to_string();
        let mut outbound = HttpRequest {
            version: run.version.clone(),
            method: req.method.to_string(),
            url: api::Url::default(),
            proto_major,
            proto_minor,
            body: Vec::new(),
            header: header_list(&req.headers),
            content_type: get_header_value(&req.headers, header::CONTENT_TYPE.as_str())
                .unwrap_or_default()
                .to_string(),
            host,
            remote_addr: req.remote_addr.clone(),
            tls: req.tls.clone(),
            auth: Some(auth),
            config: None,
        };
        let query = query_list(&req.uri);
        let fallback = outbound.clone();

        target(&run, &route, &mut outbound, query.clone());
        outbound.body = req.body;

        match call(&run, &route, outbound).await {
            Ok(resp) => render(resp),
            Err(RemoteError::Status(status)) if status.code != Code::Unknown => {
                error(status_for_code(status.code), &status.message)
            }
            Err(e) => render_error(&run, app, fallback, query, e).await,
        }
    }

    pub async fn dispatch(&self, req: ClientRequest) -> Response<Vec<u8>> {
        match self.route(&req).await {
            Ok(routed) => self.forward(routed, req).await,
            Err(resp) => resp,
        }
    }
}

/// Removes the bundle prefix, keeping the leading `/`.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
    path.strip_prefix(prefix).unwrap_or(path)
}

/// Points `req` at the handler of `route`: the route's parent, else the route.
fn target(run: &RouterRun, route: &UrlRoute, req: &mut HttpRequest, query: KeyValueList) {
    let handler = run.handler(route.resource);
    req.url = api::Url {
        host: run.owner(handler).name.clone(),
        path: run.local_name(handler).to_string(),
        query,
    };
    req.config = Some(route.config.clone());
}

async fn call(run: &RouterRun, route: &UrlRoute, req: HttpRequest) -> Result<HttpResponse, RemoteError> {
    let service = run.owner(run.handler(route.resource));
    let started = Instant::now();
    let result = service.client.serve_http(req).await;
    FORWARD_LATENCY
        .with_label_values(&[service.name.as_str()])
        .observe(started.elapsed().as_millis() as f64);
    result
}

/// Renders `err` through the application's `Error` bundle root page.
async fn render_error(
    run: &RouterRun,
    app: AppIdx,
    mut req: HttpRequest,
    query: KeyValueList,
    err: RemoteError,
) -> Response<Vec<u8>> {
    let message = err.to_string();
    log::warn!("forward for {} failed: {message}", req.host);

    let route = run.apps[app]
        .login_bundles
        .get(&LoginState::Error)
        .and_then(|lb| lb.url_router.get("/"));
    let Some(route) = route else {
        return error(StatusCode::INTERNAL_SERVER_ERROR, &message);
    };

    target(run, route, &mut req, query);
    req.content_type = "error".to_string();
    req.body = message.into_bytes();

    match call(run, route, req).await {
        Ok(resp) => render(resp),
        Err(e) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("unable to render error page: {e}"),
        ),
    }
}

pub fn status_for_code(code: Code) -> StatusCode {
    match code {
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn render(resp: HttpResponse) -> Response<Vec<u8>> {
    let mut response = Response::new(resp.body);
    let headers = response.headers_mut();

    for (key, values) in &resp.header.values {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            log::warn!("dropping invalid response header name {key:?}");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => log::warn!("dropping invalid value for response header {key:?}"),
            }
        }
    }
    if let Ok(value) = HeaderValue::from_str(&resp.content_type) {
        if !resp.content_type.is_empty() {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&resp.encoding) {
        if !resp.encoding.is_empty() {
            headers.insert(header::CONTENT_ENCODING, value);
        }
    }
    response
}

fn header_list(headers: &HeaderMap) -> KeyValueList {
    let mut list = KeyValueList::default();
    for (name, value) in headers {
        list.add(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }
    list
}

fn query_list(uri: &Uri) -> KeyValueList {
    let mut list = KeyValueList::default();
    if let Some(query) = uri.query() {
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            list.add(&k, &v);
        }
    }
    list
}

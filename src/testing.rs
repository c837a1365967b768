//! In-memory doubles for the remote-call seam and graph fixtures.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    api::{
        ApplicationBundle, AreaType, Code, ConfigureAuth, ConfigureUrl, HttpRequest,
        HttpResponse, LoginBundleDecl, LoginState, RequestAuthReq, RequestAuthResp, Resource,
        ResourceType, ServiceBundle, ServiceConfig, ServiceConfigAction,
    },
    registry::ServiceDef,
    transport::{BundleStream, Connector, RemoteError, ServiceClient},
};

pub type EventLog = Arc<Mutex<Vec<String>>>;

type ServeFn = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, RemoteError> + Send + Sync>;
type UpdateObserver = Box<dyn Fn(&ServiceConfig) -> String + Send + Sync>;

/// Scripted [`ServiceClient`].
///
/// Every call is appended to the shared event log so tests can assert on
/// the interleaving across services.
pub struct MockServiceClient {
    name: String,
    events: EventLog,
    auth: Mutex<Result<RequestAuthResp, RemoteError>>,
    serve: ServeFn,
    update_errors: Mutex<Vec<(ServiceConfigAction, RemoteError)>>,
    observer: Option<UpdateObserver>,
    bundles: Mutex<Option<Vec<Result<ServiceBundle, RemoteError>>>>,
    pub requests: Mutex<Vec<HttpRequest>>,
    pub auth_requests: Mutex<Vec<RequestAuthReq>>,
    pub configs: Mutex<Vec<ServiceConfig>>,
}

impl Default for MockServiceClient {
    fn default() -> Self {
        Self {
            name: String::new(),
            events: EventLog::default(),
            auth: Mutex::new(Ok(RequestAuthResp {
                login_state: LoginState::None,
                ..Default::default()
            })),
            serve: Box::new(|req| {
                Ok(HttpResponse {
                    content_type: "text/plain".to_string(),
                    body: format!("{}/{}", req.url.host, req.url.path).into_bytes(),
                    ..Default::default()
                })
            }),
            update_errors: Mutex::new(Vec::new()),
            observer: None,
            bundles: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            auth_requests: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
        }
    }
}

impl MockServiceClient {
    pub fn named(name: &str, events: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            events: events.clone(),
            ..Default::default()
        }
    }

    pub fn with_login_state(self, state: LoginState) -> Self {
        self.with_auth(Ok(RequestAuthResp {
            login_state: state,
            identity: "user@example.local".to_string(),
            ..Default::default()
        }))
    }

    pub fn with_auth(self, resp: Result<RequestAuthResp, RemoteError>) -> Self {
        *self.auth.lock().unwrap() = resp;
        self
    }

    pub fn with_serve<F>(mut self, serve: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, RemoteError> + Send + Sync + 'static,
    {
        self.serve = Box::new(serve);
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ServiceConfig) -> String + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn with_bundles(self, bundles: Vec<Result<ServiceBundle, RemoteError>>) -> Self {
        *self.bundles.lock().unwrap() = Some(bundles);
        self
    }

    /// Makes every later `action` update fail with `err`, or succeed again on `None`.
    pub fn fail_updates(&self, action: ServiceConfigAction, err: Option<RemoteError>) {
        let mut failures = self.update_errors.lock().unwrap();
        failures.retain(|(a, _)| *a != action);
        if let Some(err) = err {
            failures.push((action, err));
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ServiceClient for MockServiceClient {
    async fn update_service_config(&self, config: ServiceConfig) -> Result<(), RemoteError> {
        let mut event = format!("{} {} {}", self.name, config.action, config.version);
        if let Some(observer) = &self.observer {
            event = format!("{event} {}", observer(&config));
        }
        self.record(event);
        self.configs.lock().unwrap().push(config.clone());

        let failures = self.update_errors.lock().unwrap();
        match failures.iter().find(|(action, _)| *action == config.action) {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn serve_http(&self, req: HttpRequest) -> Result<HttpResponse, RemoteError> {
        self.record(format!("{} serve {}", self.name, req.url.path));
        let resp = (self.serve)(&req);
        self.requests.lock().unwrap().push(req);
        resp
    }

    async fn request_auth(&self, req: RequestAuthReq) -> Result<RequestAuthResp, RemoteError> {
        self.record(format!("{} auth {}", self.name, req.token));
        self.auth_requests.lock().unwrap().push(req);
        self.auth.lock().unwrap().clone()
    }

    async fn subscribe_bundles(&self) -> Result<BundleStream, RemoteError> {
        match self.bundles.lock().unwrap().take() {
            Some(bundles) => {
                use futures::StreamExt;
                Ok(futures::stream::iter(bundles).boxed())
            }
            None => Err(RemoteError::status(Code::Unavailable, "no subscription")),
        }
    }
}

/// [`Connector`] handing out pre-registered clients by address.
#[derive(Default)]
pub struct MockConnector {
    clients: Mutex<HashMap<String, Arc<dyn ServiceClient>>>,
    pub dialed: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn insert(&self, address: &str, client: Arc<dyn ServiceClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(address.to_string(), client);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ServiceClient>, RemoteError> {
        self.dialed.lock().unwrap().push(address.to_string());
        match self.clients.lock().unwrap().get(address) {
            Some(client) => Ok(client.clone()),
            None => Err(RemoteError::Transport(format!("connection refused: {address}"))),
        }
    }
}

pub fn bundle(name: &str) -> ServiceBundle {
    ServiceBundle {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn res(name: &str, r#type: ResourceType) -> Resource {
    Resource {
        name: name.to_string(),
        r#type,
        ..Default::default()
    }
}

pub fn with_parent(mut res: Resource, parent: &str) -> Resource {
    res.parent = parent.to_string();
    res
}

fn url(name: &str, parent: &str, map_to: &str) -> Resource {
    let config = ConfigureUrl {
        map_to: map_to.to_string(),
        config: String::new(),
    };
    Resource {
        configuration: config.encode().unwrap(),
        ..with_parent(res(name, ResourceType::None), parent)
    }
}

fn group(name: &str, include: &[&str]) -> Resource {
    Resource {
        include: include.iter().map(|s| s.to_string()).collect(),
        ..res(name, ResourceType::None)
    }
}

pub fn login(state: LoginState, prefix: &str, consume_redirect: bool, resource: &str) -> LoginBundleDecl {
    LoginBundleDecl {
        login_state: state,
        prefix: prefix.to_string(),
        consume_redirect,
        resource: resource.to_string(),
    }
}

pub fn app(hosts: &[&str], auth: &str, login_bundles: Vec<LoginBundleDecl>) -> ApplicationBundle {
    ApplicationBundle {
        hosts: hosts.iter().map(|s| s.to_string()).collect(),
        auth_resource: auth.to_string(),
        login_bundles,
    }
}

pub fn service_with(bundle: ServiceBundle, client: Arc<dyn ServiceClient>) -> ServiceDef {
    ServiceDef {
        name: bundle.name.clone(),
        address: format!("{}:9000", bundle.name),
        client,
        bundle: Arc::new(bundle),
        subscription: 0,
    }
}

pub fn service_def(bundle: ServiceBundle) -> ServiceDef {
    service_with(bundle, Arc::new(MockServiceClient::default()))
}

/// Three services wired together.
///
/// `auth` provides the authenticator, `spa` provides code consumed by
/// `ui/app-handler`, and `ui` declares the `example.local` application with
/// `None` (`/login/`), `Granted` (`/app/`, consumes redirects) and `Error`
/// (`/error/`) login bundles.
pub fn example_bundles() -> Vec<ServiceBundle> {
    let mut auth = bundle("auth");
    auth.resources
        .push(res("authenticator", ResourceType::Auth));

    let mut spa = bundle("spa");
    spa.resources.push(res("menu-code", ResourceType::SpaCode));

    let auth_config = ConfigureAuth {
        area: AreaType::System,
        environment: "QA".to_string(),
    };
    let mut ui = bundle("ui");
    ui.resources = vec![
        res("login-handler", ResourceType::Url),
        Resource {
            consume: ResourceType::SpaCode,
            ..res("app-handler", ResourceType::Url)
        },
        res("error-handler", ResourceType::Url),
        Resource {
            configuration: auth_config.encode().unwrap(),
            ..with_parent(res("auth", ResourceType::None), "auth/authenticator")
        },
        url("none/root", "ui/login-handler", "/"),
        url("granted/root", "ui/app-handler", "/"),
        url("granted/widget", "ui/app-handler", "/widget"),
        Resource {
            configuration: br#"{"File":"Quit"}"#.to_vec(),
            ..with_parent(res("granted/menu", ResourceType::None), "spa/menu-code")
        },
        url("error/root", "ui/error-handler", "/"),
        group("none", &["ui/none/root"]),
        group(
            "granted",
            &["ui/granted/root", "ui/granted/widget", "ui/granted/menu"],
        ),
        group("error", &["ui/error/root"]),
    ];
    ui.applications.push(app(
        &["example.local"],
        "ui/auth",
        vec![
            login(LoginState::None, "/login/", false, "ui/none"),
            login(LoginState::Granted, "/app/", true, "ui/granted"),
            login(LoginState::Error, "/error/", false, "ui/error"),
        ],
    ));

    vec![auth, spa, ui]
}

pub fn example_services() -> Vec<ServiceDef> {
    example_bundles().into_iter().map(service_def).collect()
}

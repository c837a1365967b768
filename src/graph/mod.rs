//! Resource graph model.
//!
//! A [`RouterRun`] is built from a registry snapshot: every declared
//! resource lands in a flat arena under its qualified name and every
//! application hostname lands in the host index. [`RouterRun::resolve`]
//! then links references by index and builds the per login state path
//! tables. A run is immutable once it has been handed to the rollout
//! engine.

mod closure;
mod resolve;
pub mod token;

use std::collections::HashMap;

use crate::{
    api::{ConfigureAuth, ConfigureUrl, LoginState, ResourceType},
    registry::ServiceDef,
};

pub use closure::DistributionPlan;
pub use token::{new_version, TokenKeyer};

/// Index of a resource in the run's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResId(pub usize);

/// Index of a service in the run's service snapshot.
pub type ServiceIdx = usize;

/// Index of an application in the run.
pub type AppIdx = usize;

/// One resource in the merged namespace.
#[derive(Clone, Debug)]
pub struct Res {
    /// Qualified name, `<service>/<local name>`.
    pub name: String,
    pub owner: ServiceIdx,
    pub declared_type: ResourceType,
    /// Own type, else the parent's. Filled in by resolution.
    pub r#type: ResourceType,
    pub consume: ResourceType,
    pub parent_name: String,
    pub include_names: Vec<String>,
    pub configuration: Vec<u8>,
    pub parent: Option<ResId>,
    pub includes: Vec<ResId>,
}

/// Authenticator bound to an application.
#[derive(Clone, Debug)]
pub struct AuthBinding {
    pub resource: ResId,
    /// Service answering auth requests: the owner of the resource's parent.
    pub service: ServiceIdx,
    pub config: ConfigureAuth,
}

#[derive(Clone, Debug)]
pub struct UrlRoute {
    pub resource: ResId,
    pub config: ConfigureUrl,
}

#[derive(Clone, Debug)]
pub struct LoginBundle {
    pub state: LoginState,
    pub prefix: String,
    pub consume_redirect: bool,
    pub bundle_name: String,
    pub bundle: Option<ResId>,
    pub url_router: HashMap<String, UrlRoute>,
}

#[derive(Clone, Debug)]
pub struct App {
    pub owner: ServiceIdx,
    pub hosts: Vec<String>,
    pub auth_name: String,
    pub auth: Option<AuthBinding>,
    pub login_bundles: HashMap<LoginState, LoginBundle>,
}

/// Host index entry.
#[derive(Clone, Debug)]
pub struct AppToken {
    /// Session cookie name for this host.
    pub token_key: String,
    pub app: AppIdx,
}

/// One versioned snapshot of the routing configuration.
#[derive(Debug)]
pub struct RouterRun {
    pub version: String,
    pub services: Vec<ServiceDef>,
    pub(crate) resources: Vec<Res>,
    pub(crate) index: HashMap<String, ResId>,
    pub apps: Vec<App>,
    pub hosts: HashMap<String, AppToken>,
    pub errors: Vec<String>,
}

pub fn qualify(service: &str, local: &str) -> String {
    format!("{service}/{}", local.trim_start_matches('/'))
}

impl RouterRun {
    /// Flattens the declarations of `services` into a new run.
    ///
    /// Services are taken in name order. A qualified name, host or login
    /// state declared twice keeps the later declaration and records a
    /// configuration error, which keeps the run from going live.
    pub fn build(mut services: Vec<ServiceDef>, version: String, keyer: &TokenKeyer) -> Self {
        services.sort_by(|a, b| a.name.cmp(&b.name));

        let mut run = RouterRun {
            version,
            services: Vec::new(),
            resources: Vec::new(),
            index: HashMap::new(),
            apps: Vec::new(),
            hosts: HashMap::new(),
            errors: Vec::new(),
        };

        for (owner, service) in services.iter().enumerate() {
            let bundle = &service.bundle;

            for r in &bundle.resources {
                let name = qualify(&bundle.name, &r.name);
                let res = Res {
                    name: name.clone(),
                    owner,
                    declared_type: r.r#type,
                    r#type: r.r#type,
                    consume: r.consume,
                    parent_name: r.parent.clone(),
                    include_names: r.include.clone(),
                    configuration: r.configuration.clone(),
                    parent: None,
                    includes: Vec::new(),
                };
                match run.index.get(&name) {
                    Some(id) => {
                        run.errors
                            .push(format!("resource {name:?} declared more than once"));
                        run.resources[id.0] = res;
                    }
                    None => {
                        run.index.insert(name, ResId(run.resources.len()));
                        run.resources.push(res);
                    }
                }
            }

            for a in &bundle.applications {
                let app_idx = run.apps.len();
                let mut login_bundles = HashMap::with_capacity(a.login_bundles.len());
                for lb in &a.login_bundles {
                    let prev = login_bundles.insert(
                        lb.login_state,
                        LoginBundle {
                            state: lb.login_state,
                            prefix: lb.prefix.clone(),
                            consume_redirect: lb.consume_redirect,
                            bundle_name: lb.resource.clone(),
                            bundle: None,
                            url_router: HashMap::new(),
                        },
                    );
                    if prev.is_some() {
                        run.errors.push(format!(
                            "login state {} declared more than once for app on {:?}",
                            lb.login_state, a.hosts
                        ));
                    }
                }
                run.apps.push(App {
                    owner,
                    hosts: a.hosts.clone(),
                    auth_name: a.auth_resource.clone(),
                    auth: None,
                    login_bundles,
                });

                for host in &a.hosts {
                    let token = AppToken {
                        token_key: keyer.cookie_name(host),
                        app: app_idx,
                    };
                    if let Some(prev) = run.hosts.insert(host.clone(), token) {
                        let prev_owner = &services[run.apps[prev.app].owner].name;
                        run.errors.push(format!(
                            "host {host:?} declared by both {prev_owner:?} and {:?}",
                            bundle.name
                        ));
                    }
                }
            }
        }

        run.services = services;
        run
    }

    pub fn get(&self, id: ResId) -> &Res {
        &self.resources[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<ResId> {
        self.index.get(name).copied()
    }

    pub fn service(&self, idx: ServiceIdx) -> &ServiceDef {
        &self.services[idx]
    }

    /// Owning service of a resource.
    pub fn owner(&self, id: ResId) -> &ServiceDef {
        self.service(self.get(id).owner)
    }

    /// Name of a resource within its owning service.
    pub fn local_name(&self, id: ResId) -> &str {
        let res = self.get(id);
        let service = &self.owner(id).name;
        res.name
            .strip_prefix(service.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(&res.name)
    }

    /// Resource that handles requests routed to `id`: its parent, else itself.
    pub fn handler(&self, id: ResId) -> ResId {
        self.get(id).parent.unwrap_or(id)
    }

    /// Application and cookie name serving `host`.
    pub fn app_for_host(&self, host: &str) -> Option<(&AppToken, &App)> {
        let token = self.hosts.get(host)?;
        Some((token, &self.apps[token.app]))
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

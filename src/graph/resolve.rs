use std::collections::HashMap;

use crate::api::{LoginState, ResourceConfig, ResourceType};

use super::{App, AuthBinding, ResId, RouterRun, UrlRoute};

type ResolvedBundle = (LoginState, Option<ResId>, HashMap<String, UrlRoute>);

impl RouterRun {
    /// Links every reference and builds the path tables.
    ///
    /// Unresolvable references and undecodable configuration are appended
    /// to `errors`; resolution carries on so one run reports every problem.
    pub fn resolve(&mut self) {
        let mut errors = Vec::new();

        let mut links = Vec::with_capacity(self.resources.len());
        for res in &self.resources {
            let parent = if res.parent_name.is_empty() {
                None
            } else {
                let found = self.lookup(&res.parent_name);
                if found.is_none() {
                    errors.push(format!(
                        "missing parent resource {:?} required by {:?}",
                        res.parent_name, res.name
                    ));
                }
                found
            };

            let mut includes = Vec::with_capacity(res.include_names.len());
            for name in &res.include_names {
                match self.lookup(name) {
                    Some(id) => includes.push(id),
                    None => errors.push(format!(
                        "missing included resource {name:?} required by {:?}",
                        res.name
                    )),
                }
            }
            links.push((parent, includes));
        }
        for (res, (parent, includes)) in self.resources.iter_mut().zip(links) {
            res.parent = parent;
            res.includes = includes;
        }

        for i in 0..self.resources.len() {
            self.resources[i].r#type = self.effective_type(ResId(i));
        }

        let mut resolved = Vec::with_capacity(self.apps.len());
        for app in &self.apps {
            let auth = match self.bind_auth(app) {
                Ok(binding) => Some(binding),
                Err(e) => {
                    errors.push(e);
                    None
                }
            };

            let mut states: Vec<_> = app.login_bundles.keys().copied().collect();
            states.sort();
            let bundles: Vec<ResolvedBundle> = states
                .into_iter()
                .map(|state| {
                    let (bundle, routes) = self.resolve_login_bundle(app, state, &mut errors);
                    (state, bundle, routes)
                })
                .collect();
            resolved.push((auth, bundles));
        }
        for (app, (auth, bundles)) in self.apps.iter_mut().zip(resolved) {
            app.auth = auth;
            for (state, bundle, routes) in bundles {
                if let Some(lb) = app.login_bundles.get_mut(&state) {
                    lb.bundle = bundle;
                    lb.url_router = routes;
                }
            }
        }

        self.errors.extend(errors);
    }

    /// Own type, else the nearest typed ancestor's.
    fn effective_type(&self, id: ResId) -> ResourceType {
        let mut res = self.get(id);
        let mut hops = 0;
        while res.declared_type.is_none() && hops < self.resources.len() {
            match res.parent {
                Some(parent) => res = self.get(parent),
                None => break,
            }
            hops += 1;
        }
        res.declared_type
    }

    fn bind_auth(&self, app: &App) -> Result<AuthBinding, String> {
        if app.auth_name.is_empty() {
            return Err(format!("app on {:?} missing authenticator", app.hosts));
        }
        let unresolved = || {
            format!(
                "app on {:?} unable to resolve authenticator {:?}",
                app.hosts, app.auth_name
            )
        };

        let id = self.lookup(&app.auth_name).ok_or_else(unresolved)?;
        let res = self.get(id);
        let parent = res.parent.ok_or_else(unresolved)?;
        if res.r#type != ResourceType::Auth {
            return Err(unresolved());
        }

        let config = match ResourceConfig::decode(res.r#type, &res.configuration) {
            Ok(ResourceConfig::Auth(config)) => config,
            Ok(_) => return Err(unresolved()),
            Err(e) => return Err(format!("invalid configuration for {:?}: {e}", res.name)),
        };
        Ok(AuthBinding {
            resource: id,
            service: self.get(parent).owner,
            config,
        })
    }

    fn resolve_login_bundle(
        &self,
        app: &App,
        state: LoginState,
        errors: &mut Vec<String>,
    ) -> (Option<ResId>, HashMap<String, UrlRoute>) {
        let mut routes = HashMap::new();
        let Some(lb) = app.login_bundles.get(&state) else {
            return (None, routes);
        };

        if !lb.prefix.starts_with('/') || !lb.prefix.ends_with('/') {
            errors.push(format!(
                "invalid prefix {:?} for app on {:?} for state {state}",
                lb.prefix, app.hosts
            ));
        }

        let Some(bundle) = self.lookup(&lb.bundle_name) else {
            errors.push(format!(
                "missing bundle {:?} for app on {:?} for state {state}",
                lb.bundle_name, app.hosts
            ));
            return (None, routes);
        };

        for id in self.included(bundle) {
            let res = self.get(id);
            let config = match ResourceConfig::decode(res.r#type, &res.configuration) {
                Ok(ResourceConfig::Url(config)) => config,
                Ok(_) => continue,
                Err(e) => {
                    errors.push(format!("invalid configuration for {:?}: {e}", res.name));
                    continue;
                }
            };
            if let Some(existing) = routes.get(&config.map_to) {
                errors.push(format!(
                    "path {:?} mapped by both {:?} and {:?} for state {state}",
                    config.map_to,
                    self.get(existing.resource).name,
                    res.name
                ));
                continue;
            }
            routes.insert(config.map_to.clone(), UrlRoute { resource: id, config });
        }

        (Some(bundle), routes)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::{LoginState, ResourceType},
        graph::{RouterRun, TokenKeyer},
        testing::{bundle, example_services, res, service_def, with_parent},
    };

    fn build(services: Vec<crate::registry::ServiceDef>) -> RouterRun {
        let mut run = RouterRun::build(services, "v1".into(), &TokenKeyer::default());
        run.resolve();
        run
    }

    #[test]
    fn test_complete_graph_resolves() {
        let run = build(example_services());
        assert!(run.errors.is_empty(), "{:?}", run.errors);

        let (_, app) = run.app_for_host("example.local").unwrap();
        assert!(app.auth.is_some());

        let none = &app.login_bundles[&LoginState::None];
        let root = &none.url_router["/"];
        assert_eq!(run.get(root.resource).name, "ui/none/root");

        let granted = &app.login_bundles[&LoginState::Granted];
        let mut paths: Vec<_> = granted.url_router.keys().cloned().collect();
        paths.sort();
        assert_eq!(paths, vec!["/", "/widget"]);
    }

    #[test]
    fn test_every_reachable_url_is_routed() {
        let run = build(example_services());
        for app in &run.apps {
            for lb in app.login_bundles.values() {
                let bundle = lb.bundle.unwrap();
                for id in run.included(bundle) {
                    if run.get(id).r#type == ResourceType::Url {
                        assert!(lb.url_router.values().any(|r| r.resource == id));
                    }
                }
            }
        }
    }

    #[test]
    fn test_effective_type_inherited() {
        let run = build(example_services());
        let widget = run.lookup("ui/granted/widget").unwrap();
        assert_eq!(run.get(widget).declared_type, ResourceType::None);
        assert_eq!(run.get(widget).r#type, ResourceType::Url);
    }

    #[test]
    fn test_missing_references_collected() {
        let mut b = bundle("svc");
        b.resources.push(with_parent(res("child", ResourceType::None), "svc/nowhere"));
        let mut group = res("group", ResourceType::None);
        group.include = vec!["svc/child".into(), "other/gone".into()];
        b.resources.push(group);

        let run = build(vec![service_def(b)]);
        assert_eq!(
            run.errors,
            vec![
                r#"missing parent resource "svc/nowhere" required by "svc/child""#.to_string(),
                r#"missing included resource "other/gone" required by "svc/group""#.to_string(),
            ]
        );

        let child = run.lookup("svc/child").unwrap();
        assert_eq!(run.get(child).parent, None);
        assert_eq!(run.get(child).r#type, ResourceType::None);
        let group = run.lookup("svc/group").unwrap();
        assert_eq!(run.get(group).includes, vec![child]);
    }

    #[test]
    fn test_missing_bundle_degrades_state() {
        let mut services = example_services();
        let ui = services.iter_mut().find(|s| s.name == "ui").unwrap();
        let mut b = (*ui.bundle).clone();
        b.resources.retain(|r| r.name != "error");
        ui.bundle = std::sync::Arc::new(b);

        let run = build(services);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].starts_with(r#"missing bundle "ui/error""#));

        let (_, app) = run.app_for_host("example.local").unwrap();
        assert!(app.login_bundles[&LoginState::Error].bundle.is_none());
        assert!(app.login_bundles[&LoginState::None].bundle.is_some());
    }

    #[test]
    fn test_bad_url_configuration() {
        let mut services = example_services();
        let ui = services.iter_mut().find(|s| s.name == "ui").unwrap();
        let mut b = (*ui.bundle).clone();
        for r in b.resources.iter_mut().filter(|r| r.name == "granted/widget") {
            r.configuration = b"not json".to_vec();
        }
        ui.bundle = std::sync::Arc::new(b);

        let run = build(services);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].starts_with(r#"invalid configuration for "ui/granted/widget""#));
    }

    #[test]
    fn test_configuration_decoded_by_effective_type() {
        let mut services = example_services();
        let ui = services.iter_mut().find(|s| s.name == "ui").unwrap();
        let mut b = (*ui.bundle).clone();
        for r in b.resources.iter_mut() {
            match r.name.as_str() {
                // SpaCode blobs are handed through untouched
                "granted/menu" => r.configuration = b"not json".to_vec(),
                "auth" => r.configuration = Vec::new(),
                _ => {}
            }
        }
        ui.bundle = std::sync::Arc::new(b);

        let run = build(services);
        assert_eq!(run.errors.len(), 1, "{:?}", run.errors);
        assert!(run.errors[0].starts_with(r#"invalid configuration for "ui/auth""#));
        let (_, app) = run.app_for_host("example.local").unwrap();
        assert!(app.auth.is_none());
        assert_eq!(app.login_bundles[&LoginState::Granted].url_router.len(), 2);
    }

    #[test]
    fn test_unresolved_authenticator() {
        let mut services = example_services();
        let ui = services.iter_mut().find(|s| s.name == "ui").unwrap();
        let mut b = (*ui.bundle).clone();
        b.applications[0].auth_resource = "ui/none/root".into();
        ui.bundle = std::sync::Arc::new(b);

        let run = build(services);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].contains("unable to resolve authenticator"));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut services = example_services();
        let ui = services.iter_mut().find(|s| s.name == "ui").unwrap();
        let mut b = (*ui.bundle).clone();
        for r in b.resources.iter_mut().filter(|r| r.name == "granted/widget") {
            r.configuration = br#"{"map_to": "/"}"#.to_vec();
        }
        ui.bundle = std::sync::Arc::new(b);

        let run = build(services);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].starts_with(r#"path "/" mapped by both"#));
    }
}

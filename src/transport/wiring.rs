//! Service-side half of distribution.
//!
//! A backend answering the router's `Add` and `Remove` messages keeps one
//! wiring table per router version, mapping qualified resource names to the
//! provider that serves them. Provider connections are shared by every
//! version naming the same endpoint and dropped once no version references
//! it, so a connection survives the overlap of two versions during a
//! rollout.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::api::{Resource, ServiceConfig, ServiceConfigAction};

use super::{Connector, RemoteError, ServiceClient};

/// A resource together with the connection to its provider.
#[derive(Clone)]
pub struct WiredResource {
    pub resource: Resource,
    pub client: Arc<dyn ServiceClient>,
}

struct VersionSetup {
    endpoints: BTreeSet<String>,
    lookup: HashMap<String, WiredResource>,
}

#[derive(Default)]
struct Tables {
    versions: HashMap<String, VersionSetup>,
    conns: HashMap<String, Arc<dyn ServiceClient>>,
}

pub struct VersionedWiring {
    connector: Arc<dyn Connector>,
    tables: Mutex<Tables>,
}

impl VersionedWiring {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one distribution message from the router.
    pub async fn apply(&self, config: &ServiceConfig) -> Result<(), RemoteError> {
        match config.action {
            ServiceConfigAction::Add => self.add(config).await,
            ServiceConfigAction::Remove => {
                self.remove(&config.version);
                Ok(())
            }
        }
    }

    /// Records the wiring of `config.version`, dialing endpoints no other
    /// version uses yet.
    ///
    /// A failed dial leaves the tables as they were.
    pub async fn add(&self, config: &ServiceConfig) -> Result<(), RemoteError> {
        let mut missing: Vec<&str> = Vec::new();
        {
            let tables = self.lock();
            for entry in &config.list {
                let endpoint = entry.endpoint.as_str();
                if !tables.conns.contains_key(endpoint) && !missing.contains(&endpoint) {
                    missing.push(endpoint);
                }
            }
        }

        let mut dialed = Vec::with_capacity(missing.len());
        for endpoint in missing {
            let client = self.connector.dial(endpoint).await.map_err(|e| {
                log::warn!(
                    "wiring: failed to dial {endpoint} for version {}: {e}",
                    config.version
                );
                e
            })?;
            dialed.push((endpoint.to_string(), client));
        }

        let mut tables = self.lock();
        for (endpoint, client) in dialed {
            // a concurrent add may have dialed the same endpoint
            tables.conns.entry(endpoint).or_insert(client);
        }

        let mut setup = VersionSetup {
            endpoints: BTreeSet::new(),
            lookup: HashMap::new(),
        };
        for entry in &config.list {
            let Some(client) = tables.conns.get(&entry.endpoint) else {
                continue;
            };
            setup.endpoints.insert(entry.endpoint.clone());
            for resource in &entry.resources {
                setup.lookup.insert(
                    resource.name.clone(),
                    WiredResource {
                        resource: resource.clone(),
                        client: client.clone(),
                    },
                );
            }
        }

        log::debug!(
            "wiring: version {} wired to {} endpoints",
            config.version,
            setup.endpoints.len()
        );
        tables.versions.insert(config.version.clone(), setup);
        Ok(())
    }

    /// Forgets `version` and drops connections no remaining version uses.
    /// Returns false for a version that was never added.
    pub fn remove(&self, version: &str) -> bool {
        let mut tables = self.lock();
        if tables.versions.remove(version).is_none() {
            return false;
        }

        let Tables { versions, conns } = &mut *tables;
        conns.retain(|endpoint, _| {
            let used = versions.values().any(|v| v.endpoints.contains(endpoint));
            if !used {
                log::debug!("wiring: closing {endpoint}");
            }
            used
        });
        true
    }

    /// Provider of `resource` as wired for `version`.
    pub fn lookup(&self, version: &str, resource: &str) -> Option<WiredResource> {
        let tables = self.lock();
        tables.versions.get(version)?.lookup.get(resource).cloned()
    }

    /// Endpoints with an open connection, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let tables = self.lock();
        let mut endpoints: Vec<_> = tables.conns.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }
}

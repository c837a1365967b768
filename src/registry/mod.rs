//! Live backend services keyed by service name.
//!
//! The registry only records who is connected and what they last declared.
//! Every mutation pushes a trigger onto the bounded rollout queue; the
//! rollout worker reads a fresh snapshot when it gets to the trigger, so a
//! burst of registrations collapses into as few rebuilds as the queue allows.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::mpsc::{error::TrySendError, Sender};

use crate::{
    api::ServiceBundle,
    core::{RouterError, RouterResult},
    metrics::SERVICES,
    transport::ServiceClient,
};

/// Identifies one bundle subscription.
pub type SubscriptionId = u64;

/// One registered backend service.
#[derive(Clone)]
pub struct ServiceDef {
    pub name: String,
    pub address: String,
    pub client: Arc<dyn ServiceClient>,
    pub bundle: Arc<ServiceBundle>,
    pub subscription: SubscriptionId,
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("subscription", &self.subscription)
            .finish()
    }
}

pub struct ServiceRegistry {
    services: Mutex<HashMap<String, ServiceDef>>,
    trigger: Sender<()>,
    next_subscription: AtomicU64,
}

impl ServiceRegistry {
    pub fn new(trigger: Sender<()>) -> Self {
        Self {
            services: Mutex::new(HashMap::with_capacity(30)),
            trigger,
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn new_subscription(&self) -> SubscriptionId {
        self.next_subscription.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceDef>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the service named by `bundle`.
    ///
    /// A subscription that renames its service drops the entry registered
    /// under the old name.
    pub fn update(
        &self,
        subscription: SubscriptionId,
        address: &str,
        client: Arc<dyn ServiceClient>,
        bundle: ServiceBundle,
    ) -> RouterResult<()> {
        if bundle.name.is_empty() {
            return Err(RouterError::Registry(format!(
                "service at {address} declared a bundle without a name"
            )));
        }

        let name = bundle.name.clone();
        let count = {
            let mut services = self.lock();
            services.retain(|other, def| other == &name || def.subscription != subscription);
            services.insert(
                name.clone(),
                ServiceDef {
                    name: name.clone(),
                    address: address.to_string(),
                    client,
                    bundle: Arc::new(bundle),
                    subscription,
                },
            );
            services.len()
        };

        log::info!("service {name} updated from {address}");
        SERVICES.set(count as i64);
        self.trigger();
        Ok(())
    }

    /// Removes `name` if it is still owned by `subscription`.
    pub fn remove(&self, name: &str, subscription: SubscriptionId) -> bool {
        let (removed, count) = {
            let mut services = self.lock();
            let owned = services
                .get(name)
                .is_some_and(|def| def.subscription == subscription);
            if owned {
                services.remove(name);
            }
            (owned, services.len())
        };

        if removed {
            log::info!("service {name} removed");
            SERVICES.set(count as i64);
            self.trigger();
        } else {
            log::debug!("service {name} already replaced, subscription {subscription} ignored");
        }
        removed
    }

    /// Registered services sorted by name.
    pub fn snapshot(&self) -> Vec<ServiceDef> {
        let mut services: Vec<_> = self.lock().values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn trigger(&self) {
        match self.trigger.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                log::warn!("rollout queue closed, registry change not applied");
            }
        }
    }
}

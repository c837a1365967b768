use std::collections::{BTreeMap, BTreeSet};

use crate::api::{self, ResourceType, ServiceConfig, ServiceConfigAction, ServiceConfigEndpoint};

use super::{ResId, RouterRun, ServiceIdx};

/// Resources each destination service must be told about, grouped by the
/// service providing them.
#[derive(Debug, Default, PartialEq)]
pub struct DistributionPlan {
    pub destinations: BTreeMap<ServiceIdx, BTreeMap<ServiceIdx, BTreeSet<ResId>>>,
}

impl DistributionPlan {
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// One distribution message per destination, in service name order.
    pub fn messages(
        &self,
        run: &RouterRun,
        action: ServiceConfigAction,
    ) -> Vec<(ServiceIdx, ServiceConfig)> {
        self.destinations
            .iter()
            .map(|(dest, providers)| {
                let list = providers
                    .iter()
                    .map(|(provider, ids)| {
                        let service = run.service(*provider);
                        let mut resources: Vec<_> =
                            ids.iter().map(|id| run.wire_resource(*id)).collect();
                        resources.sort_by(|a, b| a.name.cmp(&b.name));
                        ServiceConfigEndpoint {
                            name: service.name.clone(),
                            endpoint: service.address.clone(),
                            resources,
                        }
                    })
                    .collect();
                let config = ServiceConfig {
                    version: run.version.clone(),
                    action,
                    list,
                };
                (*dest, config)
            })
            .collect()
    }
}

impl RouterRun {
    /// Every resource reachable from `root` over parent and include edges,
    /// `root` included, in arena order.
    pub fn closure(&self, root: ResId) -> Vec<ResId> {
        self.walk(root, true)
    }

    /// Every resource reachable from `root` over include edges only.
    pub fn included(&self, root: ResId) -> Vec<ResId> {
        self.walk(root, false)
    }

    fn walk(&self, root: ResId, follow_parents: bool) -> Vec<ResId> {
        let mut settled = BTreeSet::new();
        let mut pending = BTreeSet::from([root]);

        while !pending.is_empty() {
            settled.extend(pending.iter().copied());

            let mut next = BTreeSet::new();
            for id in &pending {
                let res = self.get(*id);
                let parent = res.parent.filter(|_| follow_parents);
                for edge in parent.into_iter().chain(res.includes.iter().copied()) {
                    if !settled.contains(&edge) {
                        next.insert(edge);
                    }
                }
            }
            pending = next;
        }

        settled.into_iter().collect()
    }

    /// Resources reachable from any resolved login bundle.
    pub fn reachable(&self) -> BTreeSet<ResId> {
        let mut reachable = BTreeSet::new();
        for app in &self.apps {
            for lb in app.login_bundles.values() {
                if let Some(bundle) = lb.bundle {
                    reachable.extend(self.closure(bundle));
                }
            }
        }
        reachable
    }

    /// Computes which services need wiring to which providers.
    ///
    /// A reachable resource whose parent consumes type `T` makes the
    /// parent's owner a destination for `T`. Every reachable resource of
    /// effective type `T`, together with its parent, is then listed for
    /// every destination consuming `T`.
    pub fn distribution_plan(&self) -> DistributionPlan {
        let reachable = self.reachable();
        let mut plan = DistributionPlan::default();
        let mut consumers: BTreeMap<ResourceType, BTreeSet<ServiceIdx>> = BTreeMap::new();

        for id in &reachable {
            let Some(parent) = self.get(*id).parent else {
                continue;
            };
            let parent = self.get(parent);
            if parent.consume.is_none() {
                continue;
            }
            consumers
                .entry(parent.consume)
                .or_default()
                .insert(parent.owner);
            plan.destinations.entry(parent.owner).or_default();
        }

        for id in &reachable {
            let res = self.get(*id);
            let Some(dests) = consumers.get(&res.r#type) else {
                continue;
            };
            for dest in dests {
                let bucket = plan.destinations.entry(*dest).or_default();
                bucket.entry(res.owner).or_default().insert(*id);
                if let Some(parent) = res.parent {
                    bucket
                        .entry(self.get(parent).owner)
                        .or_default()
                        .insert(parent);
                }
            }
        }

        plan
    }

    /// Resource as sent to a destination, with its effective type.
    pub(crate) fn wire_resource(&self, id: ResId) -> api::Resource {
        let res = self.get(id);
        api::Resource {
            name: res.name.clone(),
            r#type: res.r#type,
            consume: res.consume,
            parent: res.parent_name.clone(),
            include: res.include_names.clone(),
            configuration: res.configuration.clone(),
        }
    }
}

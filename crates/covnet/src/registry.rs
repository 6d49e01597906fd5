use crate::negotiator::{PlannedCall, SubscriptionMechanism};
use crate::subscription::{Subscription, SubscriptionId};
use covnet_core::types::{ObjectId, PropertyId};
use covnet_engine::WireSubscriptionId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Where notifications for one wire id belong.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WireRoute {
    pub subscription: SubscriptionId,
    pub device_id: u32,
    /// Required source object; `None` for property-multiple subscriptions.
    pub object_id: Option<ObjectId>,
    pub mechanism: SubscriptionMechanism,
    /// Monitored property and its array index for single-property calls.
    pub property: Option<(PropertyId, Option<u32>)>,
}

impl WireRoute {
    pub fn new(subscription: SubscriptionId, device_id: u32, call: &PlannedCall) -> Self {
        Self {
            subscription,
            device_id,
            object_id: call.object_id(),
            mechanism: call.mechanism,
            property: call.monitored_property(),
        }
    }
}

pub(crate) type SubscriptionHandle = Arc<Mutex<Subscription>>;

/// Live subscriptions plus the reverse index from wire id to owner.
///
/// Each subscription sits behind its own lock, so work on one handle never
/// waits on another. The route index is the commit point for notification
/// delivery: a wire id routes only while it is in the index.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    subscriptions: DashMap<SubscriptionId, SubscriptionHandle>,
    routes: DashMap<WireSubscriptionId, WireRoute>,
}

impl Registry {
    /// Locks the live subscription for `id`, creating it when absent.
    pub async fn lock_or_create(
        &self,
        id: SubscriptionId,
        lifetime: Duration,
    ) -> OwnedMutexGuard<Subscription> {
        loop {
            let handle = self
                .subscriptions
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(Subscription::new(id, lifetime))))
                .clone();
            let guard = handle.lock_owned().await;
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Locks the live subscription for `id`, if any.
    pub async fn lock(&self, id: SubscriptionId) -> Option<OwnedMutexGuard<Subscription>> {
        let handle = self.subscriptions.get(&id)?.clone();
        let guard = handle.lock_owned().await;
        (!guard.retired).then_some(guard)
    }

    /// Removes `id` and returns its locked state, marked retired.
    pub async fn retire(&self, id: SubscriptionId) -> Option<OwnedMutexGuard<Subscription>> {
        let (_, handle) = self.subscriptions.remove(&id)?;
        let mut guard = handle.lock_owned().await;
        if guard.retired {
            return None;
        }
        guard.retired = true;
        Some(guard)
    }

    /// Retires `id` when the caller already holds its lock.
    pub fn retire_locked(&self, guard: &mut Subscription) {
        guard.retired = true;
        self.subscriptions.remove(&guard.id());
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.subscriptions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Vec<(SubscriptionId, SubscriptionHandle)> {
        self.subscriptions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn insert_route(&self, wire_id: WireSubscriptionId, route: WireRoute) {
        if let Some(previous) = self.routes.insert(wire_id, route) {
            log::debug!(
                "wire id {wire_id} reassigned from subscription {}",
                previous.subscription
            );
        }
    }

    /// Removes the route for `wire_id` if `owner` still owns it.
    pub fn remove_route(&self, wire_id: WireSubscriptionId, owner: SubscriptionId) {
        self.routes.remove_if(&wire_id, |_, route| route.subscription == owner);
    }

    pub fn route(&self, wire_id: WireSubscriptionId) -> Option<WireRoute> {
        self.routes.get(&wire_id).map(|r| r.clone())
    }
}

//! The shared facade consumers talk to.

use crate::accessor::{self, ReadResults, WriteResults};
use crate::cache::{CachePolicy, ValueCache};
use crate::config::NetworkConfig;
use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::demux::{CovHandler, HandlerId, HandlerSet};
use crate::error::CovError;
use crate::local::LocalDevice;
use crate::subscriber;
use crate::subscription::{Renewal, SubscriptionId, SubscriptionStatus};
use covnet_core::{ControlValue, CovPropertyRef, PropertyRef};
use covnet_engine::EngineFactory;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;

type Local<F> = Arc<LocalDevice<<F as EngineFactory>::Engine>>;

pub(crate) struct NetworkInner<F: EngineFactory> {
    factory: F,
    config: RwLock<NetworkConfig>,
    local: RwLock<Option<Local<F>>>,
    handlers: Arc<HandlerSet>,
    cache: Arc<ValueCache>,
    connections: DashMap<ConnectionId, Arc<ConnectionState>>,
    next_subscription: AtomicU64,
    next_connection: AtomicU64,
    // Serializes start, reconfigure and shutdown.
    lifecycle: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// A COV-aware view of a BACnet network, backed by one local device.
///
/// Cloning is cheap; every clone drives the same local device. Handlers,
/// cache policies and subscription ids outlive reconfiguration, everything
/// tied to the local device (capabilities, wire subscriptions, connections)
/// does not.
pub struct CovNetwork<F: EngineFactory> {
    inner: Arc<NetworkInner<F>>,
}

impl<F: EngineFactory> Clone for CovNetwork<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: EngineFactory> CovNetwork<F> {
    /// Validates `config`. No engine exists until [`start`](Self::start).
    pub fn new(factory: F, config: NetworkConfig) -> Result<Self, CovError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(NetworkInner {
                factory,
                config: RwLock::new(config),
                local: RwLock::new(None),
                handlers: Arc::new(HandlerSet::default()),
                cache: Arc::new(ValueCache::default()),
                connections: DashMap::new(),
                next_subscription: AtomicU64::new(0),
                next_connection: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Creates the local device. Calling it again while one is running is
    /// a no-op.
    pub async fn start(&self) -> Result<(), CovError> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.ensure_open()?;
        if self.inner.current().is_some() {
            return Ok(());
        }
        let config = self.config();
        self.inner.launch(config)
    }

    pub fn config(&self) -> NetworkConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `true` while a local device is running.
    pub fn is_available(&self) -> bool {
        self.inner.current().is_some()
    }

    pub fn create_connection(&self) -> Result<Connection<F>, CovError> {
        self.inner.local()?;
        let id = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed) + 1);
        let state = Arc::new(ConnectionState::default());
        self.inner.connections.insert(id, state.clone());
        log::info!("connection {id} opened");
        Ok(Connection::new(id, self.inner.clone(), state))
    }

    pub async fn read_properties(&self, refs: &[PropertyRef]) -> Result<ReadResults, CovError> {
        self.inner.read_properties(refs).await
    }

    pub async fn write_properties(
        &self,
        values: impl IntoIterator<Item = (PropertyRef, ControlValue)>,
    ) -> Result<WriteResults, CovError> {
        self.inner.write_properties(values.into_iter().collect()).await
    }

    /// Subscribes `refs` under a new handle.
    ///
    /// When no device could be subscribed the error is
    /// [`CovError::SubscribeFailed`]; its `subscription` stays registered
    /// (and is retried by the scheduler) if some device failed only for
    /// communication reasons.
    pub async fn cov_subscribe(
        &self,
        refs: impl IntoIterator<Item = CovPropertyRef>,
        max_delay_seconds: u32,
    ) -> Result<SubscriptionId, CovError> {
        let id = self.inner.mint_subscription();
        self.inner
            .arm(id, refs.into_iter().collect(), max_delay_seconds)
            .await?;
        Ok(id)
    }

    pub async fn cov_unsubscribe(&self, id: SubscriptionId) -> Result<(), CovError> {
        self.inner.cov_unsubscribe(id).await
    }

    /// Renews every device of `id` now, reusing the negotiated plans.
    pub async fn resubscribe(&self, id: SubscriptionId) -> Result<(), CovError> {
        let local = self.inner.local()?;
        subscriber::resubscribe(&local, id, Renewal::All).await
    }

    /// `0` disables caching for `refs`, `u64::MAX` keeps values forever and
    /// anything else is a maximum age in milliseconds.
    pub fn set_cache_policy(&self, refs: &[PropertyRef], max_age_ms: u64) {
        self.inner
            .cache
            .set_policy(refs, CachePolicy::from_max_age_ms(max_age_ms));
    }

    pub fn add_cov_handler(&self, handler: impl CovHandler + 'static) -> HandlerId {
        self.inner.handlers.add(Arc::new(handler))
    }

    pub fn remove_cov_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    pub async fn subscription_status(&self, id: SubscriptionId) -> Option<SubscriptionStatus> {
        let local = self.inner.current()?;
        let sub = local.registry.lock(id).await?;
        Some(sub.status())
    }

    /// Live subscription handles, in creation order.
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.inner
            .current()
            .map(|local| local.registry.ids())
            .unwrap_or_default()
    }

    /// Replaces the local device with one built from `config`.
    ///
    /// Every subscription is cancelled and every connection closed; cached
    /// values and device capabilities are forgotten.
    pub async fn reconfigure(&self, config: NetworkConfig) -> Result<(), CovError> {
        config.validate()?;
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.ensure_open()?;
        log::info!("reconfiguring local device {}", config.device_id);
        self.inner.stop_local().await;
        self.inner.cache.clear_values();
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.inner.launch(config)
    }

    /// Cancels the scheduler, best-effort unsubscribes every handle and
    /// releases the local device. Later calls fail with
    /// [`CovError::Closed`].
    pub async fn shutdown(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.stop_local().await;
        log::info!("network shut down");
    }
}

impl<F: EngineFactory> NetworkInner<F> {
    fn ensure_open(&self) -> Result<(), CovError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CovError::Closed);
        }
        Ok(())
    }

    fn current(&self) -> Option<Local<F>> {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn local(&self) -> Result<Local<F>, CovError> {
        self.ensure_open()?;
        self.current().ok_or(CovError::NotAvailable)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn launch(&self, config: NetworkConfig) -> Result<(), CovError> {
        let engine = match self.factory.create(&config.engine_settings()) {
            Ok(engine) => engine,
            Err(err) => {
                log::error!("cannot create local device {}: {err}", config.device_id);
                return Err(CovError::NotAvailable);
            }
        };
        let device_id = config.device_id;
        let local = LocalDevice::start(
            engine,
            config,
            self.cache.clone(),
            self.handlers.clone(),
            Handle::current(),
        );
        *self.local.write().unwrap_or_else(PoisonError::into_inner) = Some(local);
        log::info!("local device {device_id} started");
        Ok(())
    }

    /// Tears down the running local device and closes every connection.
    async fn stop_local(&self) {
        let local = self
            .local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let ids: Vec<ConnectionId> = self.connections.iter().map(|c| *c.key()).collect();
        for id in ids {
            if let Some((_, state)) = self.connections.remove(&id) {
                state.mark_closed();
                self.drop_handlers(&state);
                log::info!("connection {id} closed by local device shutdown");
            }
        }
        if let Some(local) = local {
            local.shutdown().await;
            log::info!("local device {} stopped", local.config.device_id);
        }
    }

    pub(crate) fn mint_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) async fn arm(
        &self,
        id: SubscriptionId,
        refs: Vec<CovPropertyRef>,
        max_delay_seconds: u32,
    ) -> Result<(), CovError> {
        let local = self.local()?;
        let max_delay = Duration::from_secs(u64::from(max_delay_seconds));
        subscriber::subscribe(&local, id, refs, max_delay).await
    }

    pub(crate) async fn cov_unsubscribe(&self, id: SubscriptionId) -> Result<(), CovError> {
        let local = self.local()?;
        subscriber::unsubscribe(&local, id).await
    }

    pub(crate) async fn read_properties(
        &self,
        refs: &[PropertyRef],
    ) -> Result<ReadResults, CovError> {
        let local = self.local()?;
        Ok(accessor::read_all(&local, refs).await)
    }

    pub(crate) async fn write_properties(
        &self,
        values: Vec<(PropertyRef, ControlValue)>,
    ) -> Result<WriteResults, CovError> {
        let local = self.local()?;
        Ok(accessor::write_all(&local, values).await)
    }

    pub(crate) fn add_handler(&self, handler: Arc<dyn CovHandler>) -> HandlerId {
        self.handlers.add(handler)
    }

    /// Forgets a connection without touching shared device state.
    pub(crate) fn release(&self, id: ConnectionId) {
        if let Some((_, state)) = self.connections.remove(&id) {
            self.drop_handlers(&state);
        }
    }

    fn drop_handlers(&self, state: &ConnectionState) {
        for handler in state.take_handlers() {
            self.handlers.remove(handler);
        }
    }
}

use crate::cache::ValueCache;
use crate::capability::CapabilityCache;
use crate::config::NetworkConfig;
use crate::demux::{self, EventForwarder, HandlerSet};
use crate::error::CovError;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::subscriber;
use covnet_core::types::ServicesSupported;
use covnet_engine::{EngineError, ProtocolEngine};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// One running local BACnet device: the engine plus everything whose
/// lifetime is tied to it. Rebuilt from scratch on reconfiguration.
pub(crate) struct LocalDevice<E: ProtocolEngine> {
    pub engine: E,
    pub config: NetworkConfig,
    pub capabilities: CapabilityCache,
    pub registry: Registry,
    pub cache: Arc<ValueCache>,
    pub handlers: Arc<HandlerSet>,
    permits: Semaphore,
    scheduler: Mutex<Option<Scheduler>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<E: ProtocolEngine> LocalDevice<E> {
    /// Wires the engine's listener to a dispatcher task and starts the
    /// resubscription scheduler.
    pub fn start(
        engine: E,
        config: NetworkConfig,
        cache: Arc<ValueCache>,
        handlers: Arc<HandlerSet>,
        runtime: Handle,
    ) -> Arc<Self> {
        let permits = Semaphore::new(config.max_concurrent_requests);
        let period = config.check_period();
        let local = Arc::new(Self {
            engine,
            config,
            capabilities: CapabilityCache::default(),
            registry: Registry::default(),
            cache,
            handlers,
            permits,
            scheduler: Mutex::new(None),
            dispatcher: Mutex::new(None),
        });

        let (forwarder, rx) = EventForwarder::channel();
        local.engine.register_listener(forwarder);
        let dispatcher = runtime.spawn(demux::run_dispatcher(Arc::downgrade(&local), rx));
        *lock(&local.dispatcher) = Some(dispatcher);

        let scheduler = Scheduler::start(Arc::downgrade(&local), period, runtime);
        *lock(&local.scheduler) = Some(scheduler);
        local
    }

    /// Runs one wire call under the concurrency bound and the configured
    /// timeout.
    pub async fn call<T, F>(&self, device_id: u32, request: F) -> Result<T, CovError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| CovError::Closed)?;
        match tokio::time::timeout(self.config.timeout(), request).await {
            Ok(result) => result.map_err(|e| CovError::from_engine(device_id, e)),
            Err(_) => Err(CovError::from_engine(device_id, EngineError::Timeout)),
        }
    }

    /// The device's services, read once and cached.
    pub async fn capabilities(&self, device_id: u32) -> Result<ServicesSupported, CovError> {
        if let Some(services) = self.capabilities.get(device_id) {
            return Ok(services);
        }
        let services = self
            .call(device_id, self.engine.read_services_supported(device_id))
            .await?;
        log::debug!("device {device_id} supports {services:?}");
        self.capabilities.insert(device_id, services);
        Ok(services)
    }

    /// Stops the scheduler, best-effort unsubscribes every handle and
    /// terminates the engine.
    pub async fn shutdown(&self) {
        let scheduler = lock(&self.scheduler).take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        let mut jobs = Vec::new();
        for id in self.registry.ids() {
            jobs.push(subscriber::unsubscribe(self, id));
        }
        for result in join_all(jobs).await {
            if let Err(err) = result {
                log::debug!("unsubscribe during shutdown: {err}");
            }
        }
        self.permits.close();
        self.engine.terminate();
        if let Some(dispatcher) = lock(&self.dispatcher).take() {
            dispatcher.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

use crate::accessor::{ReadResults, WriteResults};
use crate::demux::{CovHandler, HandlerId};
use crate::error::CovError;
use crate::network::NetworkInner;
use crate::subscription::SubscriptionId;
use covnet_core::{ControlValue, CovPropertyRef, PropertyRef};
use covnet_engine::EngineFactory;
use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The part of a connection the network can close from its side.
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    closed: AtomicBool,
    handlers: Mutex<Vec<HandlerId>>,
}

impl ConnectionState {
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn take_handlers(&self) -> Vec<HandlerId> {
        std::mem::take(&mut *self.handlers.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A closeable handle for one unit of work against a [`CovNetwork`].
///
/// A connection owns at most one subscription handle and the handlers added
/// through it; closing it releases both but leaves shared device state
/// alone. Reconfiguring or shutting down the network closes every
/// connection.
///
/// [`CovNetwork`]: crate::CovNetwork
pub struct Connection<F: EngineFactory> {
    id: ConnectionId,
    network: Arc<NetworkInner<F>>,
    state: Arc<ConnectionState>,
    // Async lock: re-arming awaits while holding it.
    subscription: tokio::sync::Mutex<Option<SubscriptionId>>,
}

impl<F: EngineFactory> Connection<F> {
    pub(crate) fn new(
        id: ConnectionId,
        network: Arc<NetworkInner<F>>,
        state: Arc<ConnectionState>,
    ) -> Self {
        Self {
            id,
            network,
            state,
            subscription: tokio::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed() || self.network.is_closed()
    }

    fn ensure_open(&self) -> Result<(), CovError> {
        if self.is_closed() {
            return Err(CovError::Closed);
        }
        Ok(())
    }

    pub async fn read_properties(&self, refs: &[PropertyRef]) -> Result<ReadResults, CovError> {
        self.ensure_open()?;
        self.network.read_properties(refs).await
    }

    pub async fn write_properties(
        &self,
        values: impl IntoIterator<Item = (PropertyRef, ControlValue)>,
    ) -> Result<WriteResults, CovError> {
        self.ensure_open()?;
        self.network
            .write_properties(values.into_iter().collect())
            .await
    }

    /// Subscribes `refs` under this connection's handle, replacing whatever
    /// it subscribed before. The handle is minted on first use and stays the
    /// same for the life of the connection.
    pub async fn cov_subscribe(
        &self,
        refs: impl IntoIterator<Item = CovPropertyRef>,
        max_delay_seconds: u32,
    ) -> Result<SubscriptionId, CovError> {
        self.ensure_open()?;
        let mut current = self.subscription.lock().await;
        let id = *current.get_or_insert_with(|| self.network.mint_subscription());
        self.network
            .arm(id, refs.into_iter().collect(), max_delay_seconds)
            .await?;
        Ok(id)
    }

    /// Cancels this connection's subscription, if it has one.
    pub async fn cov_unsubscribe(&self) -> Result<(), CovError> {
        self.ensure_open()?;
        let id = self.subscription.lock().await.take();
        match id {
            Some(id) => match self.network.cov_unsubscribe(id).await {
                Err(CovError::UnknownSubscription(_)) => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }

    /// The subscription handle owned by this connection, once subscribed.
    pub async fn subscription(&self) -> Option<SubscriptionId> {
        *self.subscription.lock().await
    }

    /// Adds a handler that is removed again when the connection closes.
    pub fn add_cov_handler(
        &self,
        handler: impl CovHandler + 'static,
    ) -> Result<HandlerId, CovError> {
        self.ensure_open()?;
        let id = self.network.add_handler(Arc::new(handler));
        self.state
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        Ok(id)
    }

    pub async fn close(&self) {
        if !self.state.mark_closed() {
            return;
        }
        self.network.release(self.id);
        let id = self.subscription.lock().await.take();
        if let Some(id) = id {
            if let Err(err) = ignore_unknown(self.network.cov_unsubscribe(id).await) {
                log::debug!("connection {} could not unsubscribe {id}: {err}", self.id);
            }
        }
        log::info!("connection {} closed", self.id);
    }
}

impl<F: EngineFactory> Drop for Connection<F> {
    fn drop(&mut self) {
        if !self.state.mark_closed() {
            return;
        }
        self.network.release(self.id);
        let id = self.subscription.get_mut().take();
        log::info!("connection {} dropped", self.id);
        let Some(id) = id else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                let network = self.network.clone();
                runtime.spawn(async move {
                    if let Err(err) = ignore_unknown(network.cov_unsubscribe(id).await) {
                        log::debug!("unsubscribing {id} after drop: {err}");
                    }
                });
            }
            Err(_) => log::warn!("connection dropped outside a runtime; {id} stays subscribed"),
        }
    }
}

/// A handle already torn down elsewhere counts as released.
fn ignore_unknown(result: Result<(), CovError>) -> Result<(), CovError> {
    match result {
        Err(CovError::UnknownSubscription(_) | CovError::NotAvailable | CovError::Closed) => Ok(()),
        other => other,
    }
}

impl<F: EngineFactory> fmt::Debug for Connection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

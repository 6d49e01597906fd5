//! Periodic resubscription and polling.
//!
//! One dedicated thread drives a fixed-period scan on the runtime. Each scan
//! renews handles that are about to expire (or that have devices waiting for
//! a retry) and reads polled devices. The work itself is spawned onto the
//! runtime so the scan thread never performs more than bookkeeping.

use crate::accessor::{self, ReadMode};
use crate::demux::{self, CovUpdates};
use crate::local::LocalDevice;
use crate::negotiator::SubscriptionMechanism;
use crate::subscriber;
use crate::subscription::{Renewal, SubscriptionId};
use covnet_engine::ProtocolEngine;
use futures_util::future::join_all;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Handle to the scan thread.
#[derive(Debug)]
pub(crate) struct Scheduler {
    thread: Option<std::thread::JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn start<E: ProtocolEngine>(
        local: Weak<LocalDevice<E>>,
        period: Duration,
        runtime: Handle,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));
        let spawner = runtime.clone();
        let thread = std::thread::Builder::new()
            .name("covnet-resubscribe".into())
            .spawn(move || {
                runtime.block_on(run(local, period, spawner, shutdown_rx));
            });
        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                log::error!("failed to start resubscription thread: {err}");
                None
            }
        };
        Self { thread, shutdown }
    }

    /// Cancels the scan and waits for the thread to finish its current pass.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run<E: ProtocolEngine>(
    local: Weak<LocalDevice<E>>,
    period: Duration,
    spawner: Handle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let Some(local) = local.upgrade() else {
                    return;
                };
                scan(local, period, &spawner).await;
            }
        }
    }
}

/// One pass over the registry.
pub(crate) async fn scan<E: ProtocolEngine>(
    local: Arc<LocalDevice<E>>,
    period: Duration,
    spawner: &Handle,
) {
    let now = Instant::now();
    let mut tasks = Vec::new();
    for (id, handle) in local.registry.snapshot() {
        // A handle busy being (re)armed is left for the next pass.
        let Ok(sub) = handle.try_lock() else {
            continue;
        };
        if sub.retired {
            continue;
        }
        let renewal = sub.renewal_due(now, period);
        let polled = !sub.polled().is_empty();
        drop(sub);
        if renewal.is_none() && !polled {
            continue;
        }
        tasks.push(spawner.spawn(service(local.clone(), id, renewal)));
    }
    for result in join_all(tasks).await {
        if let Err(err) = result {
            log::warn!("resubscription task failed: {err}");
        }
    }
}

async fn service<E: ProtocolEngine>(
    local: Arc<LocalDevice<E>>,
    id: SubscriptionId,
    renewal: Option<Renewal>,
) {
    if let Some(scope) = renewal {
        match subscriber::resubscribe(&local, id, scope).await {
            Ok(()) => log::debug!("subscription {id} renewed ({scope:?})"),
            Err(err) => log::warn!("subscription {id} not renewed: {err}"),
        }
    }
    poll(&local, id).await;
}

/// Reads every polled device of `id` and delivers what was read.
pub(crate) async fn poll<E: ProtocolEngine>(local: &LocalDevice<E>, id: SubscriptionId) {
    let polled = match local.registry.lock(id).await {
        Some(sub) => sub.polled(),
        None => return,
    };
    for (device_id, mechanism, refs) in polled {
        let mode = if mechanism == SubscriptionMechanism::PollMultiple {
            ReadMode::Multiple
        } else {
            ReadMode::Single
        };
        let results = accessor::fetch(local, device_id, &refs, mode).await;
        let updates: CovUpdates = results
            .into_iter()
            .filter_map(|(r, result)| match result {
                Ok(value) => Some((r, value)),
                Err(err) => {
                    log::debug!("polling {r} for {id} failed: {err}");
                    None
                }
            })
            .collect();
        if !updates.is_empty() {
            demux::deliver(local, id, &updates);
        }
    }
}

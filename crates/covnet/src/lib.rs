//! Change-of-value subscription orchestration for BACnet gateways.
//!
//! A [`CovNetwork`] keeps sets of remote properties live across many
//! devices. For every device it picks the richest mechanism the device
//! advertises (property-multiple COV, single-property COV with increments,
//! whole-object COV, or polling as a last resort), renews the resulting wire
//! subscriptions before they lapse, and hands decoded updates to registered
//! [`CovHandler`]s. The same network serves batched reads and writes, grouped
//! per device into multi-property calls where possible.
//!
//! Reads and notifications carry raw [`PropertyValue`]s;
//! [`decode_results`] and [`decode_updates`] flatten them into the plain
//! numbers, bits and text of [`covnet_core::Decoded`].
//!
//! [`PropertyValue`]: covnet_core::types::PropertyValue
//!
//! ```no_run
//! use covnet::{CovNetwork, NetworkConfig};
//! use covnet_core::types::ObjectType;
//! use covnet_core::{CovPropertyRef, PropertyRef};
//! use covnet_engine::SimulatedNetwork;
//!
//! # async fn demo() -> Result<(), covnet::CovError> {
//! let network = CovNetwork::new(SimulatedNetwork::new(), NetworkConfig::default())?;
//! network.start().await?;
//! network.add_cov_handler(|id: covnet::SubscriptionId, updates: &covnet::CovUpdates| {
//!     for (r, value) in covnet::decode_updates(updates) {
//!         println!("{id}: {r} = {value:?}");
//!     }
//! });
//! let temperature = PropertyRef::present_value(1200, ObjectType::AnalogInput, 3);
//! let id = network.cov_subscribe([CovPropertyRef::from(temperature)], 0).await?;
//! network.cov_unsubscribe(id).await?;
//! network.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - **`serde`** — derives `Serialize`/`Deserialize` on configuration and
//!   status types.

mod accessor;
mod cache;
mod capability;
pub mod config;
mod connection;
mod demux;
pub mod error;
mod local;
mod negotiator;
mod network;
mod registry;
mod scheduler;
mod subscriber;
mod subscription;

pub use accessor::{decode_results, PartialWriteFailure, ReadResults, WriteResults};
pub use cache::CachePolicy;
pub use config::NetworkConfig;
pub use connection::{Connection, ConnectionId};
pub use demux::{decode_updates, CovHandler, CovUpdates, HandlerId};
pub use error::CovError;
pub use negotiator::SubscriptionMechanism;
pub use network::CovNetwork;
pub use subscription::{DeviceState, DeviceStatus, SubscriptionId, SubscriptionStatus};

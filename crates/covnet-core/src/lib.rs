//! Shared BACnet data model for the covnet crate family.
//!
//! `covnet-core` holds the types every layer agrees on: object and property
//! identifiers, decoded property values, the services a device advertises,
//! [`PropertyRef`] addressing, and the value codec that turns wire values into
//! plain numbers, bits and text (and back again for writes).
//!
//! # Feature flags
//!
//! - **`serde`** — derives `Serialize`/`Deserialize` on public types.

/// Conversions between property values and consumer-facing values.
pub mod codec;
/// Device/object/property addressing.
pub mod reference;
/// Object identifiers, property identifiers, values and service bitmaps.
pub mod types;

pub use codec::{ControlValue, Decoded, Number};
pub use reference::{CovPropertyRef, PropertyRef};

//! # Topic events: bus, subscriptions, typed payloads.
//!
//! This module groups the publish/subscribe layer that sits on top of the
//! executor:
//!
//! - [`record`]: [`SubscriberId`] and the tombstoned handler records.
//! - [`bus`]: [`EventBus`], the byte-payload topic bus.
//! - [`typed`]: [`TypedEventBus`] and the [`Pod`] payload contract.
//!
//! ```text
//! publish(topic, bytes) ──snapshot──► [record, record, …]
//!                                        │ one pool task per live record
//!                                        ▼
//!                                 active? ── handler(bytes)
//! ```

pub mod bus;
pub mod record;
pub mod typed;

pub use bus::EventBus;
pub use record::SubscriberId;
pub use typed::{Pod, TypedEventBus};

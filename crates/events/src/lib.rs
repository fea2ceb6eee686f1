//! Generic multicast events with independent per-subscriber delivery.
//!
//! This crate provides the concurrency-safe pub/sub primitive underneath
//! the herald notification engine:
//!
//! - [`Event`] -- plain multicast: one `notify` reaches every subscriber
//!   through its own ordered delivery queue, without ever blocking the
//!   producer.
//! - [`KeyedEvent`] -- subscribers register under a key; only
//!   matching-key notifications reach them.
//! - [`NoArgEvent`] -- payload-less variant for signal-style events.
//! - [`Subscription`] -- RAII guard; dropping it unsubscribes.
//! - [`DeliveryMode`] -- per-subscription queueing discipline.

pub mod event;
pub mod keyed;
pub mod noarg;

pub use event::{DeliveryMode, Event, Subscription};
pub use keyed::KeyedEvent;
pub use noarg::NoArgEvent;

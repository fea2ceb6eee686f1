//! The herald notification manager.
//!
//! This crate ties the event primitives from `herald-events` to the
//! notification model from `herald-core`:
//!
//! - `manager` -- the [`NotificationManager`]: routing, persistence,
//!   replay, and read tracking
//! - `subscription` -- RAII guards returned by the manager's subscribe
//!   operations

pub mod manager;
pub mod subscription;

pub use manager::NotificationManager;
pub use subscription::{NotificationSubscription, ReadSubscription};

//! Shared domain types for the herald notification engine.
//!
//! This crate is the foundation layer consumed by every other workspace
//! member:
//!
//! - [`UserAddress`] -- validated identity of a single user.
//! - [`Recipient`] -- who a notification is addressed to (a single user,
//!   everyone, or a named group of users).
//! - [`Notification`] -- the immutable notification envelope, optionally
//!   persisted under a [`PersistencyKey`] until read, superseded, cleared,
//!   or expired.
//! - [`CoreError`] -- construction-time validation errors.

pub mod address;
pub mod error;
pub mod notification;
pub mod recipient;
pub mod types;

pub use address::UserAddress;
pub use error::CoreError;
pub use notification::{Notification, Persistence, PersistencyKey};
pub use recipient::{GroupRecipient, Recipient, RecipientId};
pub use types::Timestamp;

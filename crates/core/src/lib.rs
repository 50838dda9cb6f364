//! Envelope model and backend contracts shared by every courier crate.
//!
//! The queue itself lives in `courier-queue`; concrete persistence and
//! transport backends implement the [`Store`] and [`Transport`] traits defined
//! here in their own crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Hex-rendered CBOR encoding used for packets and packed messages.
pub mod codec;

mod envelope;
mod error;
mod message;

/// Persistence contract.
pub mod store;

/// Fan-out/notification contract.
pub mod transport;

pub use envelope::{Envelope, Status};
pub use error::Error;
pub use message::Message;
pub use store::{Store, StoreError};
pub use transport::{Incoming, Transport, TransportError};

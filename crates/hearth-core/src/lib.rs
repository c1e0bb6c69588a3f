//! Core state machines for Hearth.
//!
//! Everything in this crate is Sans-IO: methods take the current time as a
//! parameter and return actions for a driver to execute. Time and randomness
//! come from an [`env::Environment`], so the same code runs against the system
//! clock in production and a virtual clock in simulation.
//!
//! # Components
//!
//! - [`connection::ConnectionManager`]: transport lifecycle, handshake,
//!   heartbeats and reconnection
//! - [`backoff::Backoff`]: capped exponential backoff with jitter
//! - [`env::Environment`]: time and randomness

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;

pub use error::ConnectionError;

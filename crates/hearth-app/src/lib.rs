//! Application layer for Hearth
//!
//! Generic async runtime that runs a [`ChatSession`](hearth_client::ChatSession)
//! against a [`Driver`], so the same orchestration code runs over QUIC in
//! production and over an in-memory server in simulation.
//!
//! # Components
//!
//! - [`Driver`]: Trait for platform-specific transport I/O
//! - [`Runtime`]: Event loop owning the session; all state changes happen on
//!   its task
//! - [`ChatHandle`]: Cloneable command handle with a [`SessionView`]
//!   subscription
//! - [`SessionView`]: Immutable snapshot of observable session state
//! - [`SystemEnv`]: Production environment (tokio clock, OS randomness)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod error;
mod handle;
#[cfg(feature = "transport")]
mod quic;
mod runtime;
mod system_env;
mod view;

pub use driver::Driver;
pub use error::RuntimeError;
pub use handle::ChatHandle;
#[cfg(feature = "transport")]
pub use quic::QuicDriver;
pub use runtime::{DEFAULT_TICK_INTERVAL, Runtime};
pub use system_env::SystemEnv;
pub use view::{MessageView, SessionView};

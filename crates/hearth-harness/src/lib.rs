//! Deterministic simulation harness for Hearth.
//!
//! Everything needed to test the chat client without a network:
//!
//! - [`SimEnv`]: virtual clock and seeded RNG implementing
//!   [`Environment`](hearth_core::env::Environment)
//! - [`SimServer`]: in-memory model server speaking the wire protocol
//! - [`SimWorld`]: sessions wired synchronously to the model server, for
//!   scenario and property tests
//! - [`SimDriver`]: [`Driver`](hearth_app::Driver) over a shared model
//!   server, so the production [`Runtime`](hearth_app::Runtime) runs in tests
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the timeline
//! and presence invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;
pub mod world;

pub use invariants::{
    AgreesWithServer, ChronologicalOrder, ClientSnapshot, DeliveryMatchesId, DisposedIsEmpty,
    Invariant, InvariantRegistry, InvariantResult, MessageSnapshot, NoDuplicateLocal,
    ServerMessage, SystemSnapshot, TypingNotExpired, UniqueServerIds, Violation,
};
pub use sim_driver::{SimDriver, SimDriverError};
pub use sim_env::{SIM_EPOCH_MS, SimEnv, SimInstant};
pub use sim_server::{ConnId, SharedSimServer, SimServer, create_shared_server, lock};
pub use world::{ClientId, SimClient, SimWorld, WORLD_ROOM, WORLD_TOKEN};

//! # tunelink
//!
//! Client library for tunable laser controllers that speak JSON request/reply
//! messages over a persistent TCP socket. Every message carries a transmission
//! id; a one-time `start_link` handshake opens the link, after which the
//! wavelength can be set, polled until the controller converges, read out,
//! and used for a one-shot beam alignment.
//!
//! ## Crate Structure
//!
//! Leaves first; control flows from the top of the list down to the socket.
//!
//! - **`laser`**: `TunableLaser`, a shareable driver implementing the
//!   `WavelengthTunable` capability from **`capabilities`**.
//! - **`tuning`**: the set-target / poll-until-converged state machine, with
//!   cancellation, and the single read-out and alignment operations.
//! - **`session`**: handshake, link state and lifecycle; refuses operational
//!   requests until the link is up.
//! - **`client`**: correlated call/response over one transport plus a bounded
//!   diagnostic log of recent exchanges.
//! - **`protocol`**: frame boundaries, the JSON message codec and the status
//!   domain of each operation.
//! - **`transport`**: the async byte stream and TCP connect/close.
//! - **`quantity`**: length quantities with units.
//! - **`error`**: the crate-wide `LinkError`.
//! - **`config`**: Figment-based settings (TOML file plus `TUNELINK_` env vars).
//! - **`telemetry`**: `tracing` subscriber setup.
//! - **`mock`**: a scripted fake controller for tests and demos.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod laser;
pub mod mock;
pub mod protocol;
pub mod quantity;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod tuning;

pub use error::{LinkError, LinkResult};
pub use laser::TunableLaser;
pub use quantity::{LengthUnit, Quantity};
pub use session::LinkSession;
pub use tuning::{TuningController, TuningOutcome};

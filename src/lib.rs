//! # Maze Race Session Server
//!
//! Authoritative session server for the two-player maze race: admits
//! exactly two network clients, relays their state changes to each other,
//! and resolves the race outcome exactly once under concurrent, racing
//! inputs (simultaneous victory claims, mid-race disconnects, the clock
//! expiring).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   MAZE RACE SESSION SERVER                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  race/           - Race rules, no I/O                        │
//! │  ├── state.rs    - Positions, collected items, visited rooms │
//! │  ├── outcome.rs  - At-most-once outcome arbitration          │
//! │  └── timer.rs    - The single race countdown                 │
//! │                                                              │
//! │  network/        - TCP line protocol and sessions            │
//! │  ├── protocol.rs - Typed wire messages                       │
//! │  ├── session.rs  - Session registry + broadcast relay        │
//! │  └── server.rs   - Acceptor, per-session read loops          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolution Guarantee
//!
//! Victory claims, timer expiry, and disconnect forfeits all funnel into
//! one check-and-set over the race outcome. Whatever the interleaving,
//! at most one transition out of `Unresolved` ever happens: one session
//! receives `VICTORY`, the rest receive `DEFEAT` (or everyone receives
//! the timeout), and every losing attempt is a silent no-op.
//!
//! One server process hosts exactly one race; a fresh race requires a
//! fresh process.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;
pub mod race;

// Re-export commonly used types
pub use network::protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use network::server::{RaceServer, ServerConfig, ServerError};
pub use network::session::{PlayerSession, SessionRegistry};
pub use race::outcome::{OutcomeArbiter, RaceOutcome, Resolution};
pub use race::state::{PlayerId, RaceState};
pub use race::timer::RaceTimer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// TCP port of the reference deployment
pub const DEFAULT_PORT: u16 = 12345;

/// Race duration in seconds (10 minutes)
pub const RACE_DURATION_SECS: u64 = 600;

/// Delay between outcome resolution and socket teardown, letting the
/// final messages flush
pub const TEARDOWN_DELAY_SECS: u64 = 5;

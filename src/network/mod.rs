//! Network Layer
//!
//! TCP line-protocol server for the two-player race. This layer owns all
//! I/O and concurrency wiring; the race rules themselves live in `race/`.

pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use server::{RaceServer, ServerConfig, ServerError};
pub use session::{PlayerSession, SessionRegistry};

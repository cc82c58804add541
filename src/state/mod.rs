//! Shared state: live connections, scope membership, and fan-out.

mod broadcast;
mod connection;
mod hub;
mod registry;

pub use broadcast::Broadcaster;
pub use connection::{ConnId, ConnIdGenerator, Connection, Identity};
pub use hub::Hub;
pub use registry::ScopeRegistry;

/// Scope identifier: the room name in room mode, the decimal channel id in
/// channels mode.
pub type ScopeId = String;

/// The single implicit scope used in room mode.
pub const ROOM_SCOPE: &str = "lobby";

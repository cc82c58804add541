//! Accepting sockets and running sessions.

mod gateway;
mod session;

pub use gateway::Gateway;
pub use session::{Session, SessionRoute};

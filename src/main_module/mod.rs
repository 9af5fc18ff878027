//! Process wiring: logging, backend selection, HTTP server.

mod bootstrap;
mod health;
mod server;

pub use bootstrap::*;
pub use health::*;
pub use server::*;

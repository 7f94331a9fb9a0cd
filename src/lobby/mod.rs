//! Player commands against the race registry

pub mod service;

pub use service::{LobbyError, LobbyService};

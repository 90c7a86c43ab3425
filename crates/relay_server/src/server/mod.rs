//! Relay server orchestration.
//!
//! [`RelayServer`] owns the shared components and the accept loop; [`handlers`]
//! contains the per-connection task.

pub mod core;
pub mod handlers;

pub use self::core::{bind_listener, RelayServer};
pub use self::handlers::{ConnectionContext, Rejection};

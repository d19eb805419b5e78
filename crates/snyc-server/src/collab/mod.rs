//! Real-time collaborative note editing.

pub mod registry;
pub mod session;
pub mod ws;

pub use registry::ConnectionRegistry;
pub use session::SessionContext;

// ukv-common - Shared types and error taxonomy for UniKV
//
// This crate defines what drivers and the client facade exchange.

pub mod error;
pub mod reply;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use reply::*;
pub use types::*;

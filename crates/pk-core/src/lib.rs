//! pikyak/crates/pk-core/src/lib.rs
//!
//! The central domain logic and interface definitions for Pikyak.

pub mod error;
pub mod models;
pub mod service;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use service::BoardService;
pub use traits::*;

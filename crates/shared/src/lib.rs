//! SupportDesk Shared Types and Protocol
//!
//! This crate contains the domain types and the envelope wire protocol shared by
//! the realtime server and the session client.

pub mod envelope;
pub mod error;
pub mod types;

pub use envelope::*;
pub use error::*;
pub use types::*;

//! # DDP Protocol
//!
//! Wire-level types for the DDP client.
//!
//! This crate provides:
//! - `ClientMessage` / `ServerMessage`, the frames exchanged with a server
//! - A JSON text codec (`encode`, `decode_server`, `decode_client`)
//! - `MethodError`, the error object carried by `result` and `nosub`
//! - Protocol version negotiation constants
//! - Seeded random streams producing the same IDs as the server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod random;
mod version;

pub use codec::{decode_client, decode_server, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ClientMessage, MethodError, ServerMessage};
pub use random::{random_seed, Alea, RandomStream, UNMISTAKABLE_CHARS};
pub use version::{is_supported, DEFAULT_VERSION, SUPPORTED_VERSIONS};

//! Identifier types shared by the session, saga and API crates.

pub mod types;

pub use types::{InvalidId, RequestId, SessionId};

//! # hearth-shared
//!
//! Types shared by the Hearth store and server: user identity, the signed
//! access/refresh token service, and the JSON events pushed over the
//! notification and chat WebSockets.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod token;
pub mod types;

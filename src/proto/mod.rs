//! RESP wire format.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder for commands, decoder for replies
//! - [`reply`] - Structured replies, including redirects

pub mod codec;
pub mod reply;

pub use reply::{Redirect, RedirectKind, Reply};

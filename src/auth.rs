//! Credential identifiers, redacted secrets, key material, and live session tokens.

pub mod id;
pub mod keys;
pub mod secret;
pub mod token;

pub use id::*;
pub use keys::*;
pub use secret::*;
pub use token::*;

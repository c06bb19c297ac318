//! Provider-facing descriptors.
//!
//! [`ApiDescriptor`] is validated metadata about the brokerage web API: the HTTPS base URL,
//! the endpoint paths the session drives, and the OAuth realm to sign with.

pub mod descriptor;

pub use descriptor::*;

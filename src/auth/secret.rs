//! Secure byte wrapper that redacts and wipes sensitive material.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use zeroize::{Zeroize, ZeroizeOnDrop};
// self
use crate::_prelude::*;

/// Redacted secret bytes kept out of logs and zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);
impl SecretBytes {
	/// Wraps raw secret bytes.
	pub fn new(value: impl Into<Vec<u8>>) -> Self {
		Self(value.into())
	}

	/// Returns the raw bytes. Callers must avoid logging them.
	pub fn expose(&self) -> &[u8] {
		&self.0
	}

	/// Lowercase hex rendering of the secret, as used in OAuth base string prefixes.
	pub fn to_hex(&self) -> String {
		hex::encode(&self.0)
	}

	/// Standard base64 rendering of the secret.
	pub fn to_base64(&self) -> String {
		STANDARD.encode(&self.0)
	}

	/// Number of secret bytes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when no bytes are held.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl Debug for SecretBytes {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SecretBytes").field(&"<redacted>").finish()
	}
}
impl Display for SecretBytes {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

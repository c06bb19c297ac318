//! Live session token record and lifecycle helpers.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{_prelude::*, auth::SecretBytes, error::CryptoError};

/// Lifecycle status for a live session token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LstStatus {
	/// Token is valid for signing.
	Active,
	/// Token reached its expiry instant.
	Expired,
}

/// Symmetric key derived from the Diffie-Hellman exchange and used to HMAC-sign API calls.
///
/// The key is as sensitive as a private key: formatters redact it and the bytes are wiped when
/// the last reference is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct LiveSessionToken {
	key: SecretBytes,
	/// Instant the token was derived locally.
	pub computed_at: OffsetDateTime,
	/// Instant after which the token must not sign requests.
	pub expires_at: OffsetDateTime,
}
impl LiveSessionToken {
	/// Lifetime assumed when the provider omits an expiration.
	pub const DEFAULT_LIFETIME: Duration = Duration::hours(24);

	/// Wraps raw key bytes.
	pub fn new(
		key: impl Into<Vec<u8>>,
		computed_at: OffsetDateTime,
		expires_at: OffsetDateTime,
	) -> Self {
		Self { key: SecretBytes::new(key), computed_at, expires_at }
	}

	/// Decodes the base64 form the provider documents for live session tokens.
	pub fn from_base64(
		encoded: &str,
		computed_at: OffsetDateTime,
		expires_at: OffsetDateTime,
	) -> Result<Self, CryptoError> {
		let key = STANDARD
			.decode(encoded.trim())
			.map_err(|source| CryptoError::InvalidBase64 { field: "live_session_token", source })?;

		Ok(Self::new(key, computed_at, expires_at))
	}

	/// Raw key bytes used as the HMAC key. Callers must avoid logging them.
	pub fn key_bytes(&self) -> &[u8] {
		self.key.expose()
	}

	/// Base64 rendering of the key.
	pub fn to_base64(&self) -> String {
		self.key.to_base64()
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> LstStatus {
		if instant >= self.expires_at { LstStatus::Expired } else { LstStatus::Active }
	}

	/// Returns `true` if the token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), LstStatus::Expired)
	}

	/// Returns `true` if the token is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` when the token expires within `window` of `now` (or already has).
	pub fn expires_within(&self, window: Duration, now: OffsetDateTime) -> bool {
		self.expires_at - now <= window
	}

	/// Remaining lifetime relative to `now`, clamped at zero.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		let remaining = self.expires_at - now;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}
impl Debug for LiveSessionToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LiveSessionToken")
			.field("key", &"<redacted>")
			.field("computed_at", &self.computed_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

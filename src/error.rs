//! Session-level error types shared across key loading, negotiation, signing, and polling.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem (key sources, descriptor, request construction).
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Cryptographic failure; never retried.
	#[error(transparent)]
	Crypto(#[from] CryptoError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Provider rejected the credentials or the live session token failed verification.
	#[error("Authentication failed: {reason}.")]
	Authentication {
		/// Provider- or session-supplied reason string.
		reason: String,
	},
	/// The live session token expired; negotiate a new one before signing again.
	#[error("Live session token expired at {expired_at}.")]
	ExpiredSession {
		/// Expiry instant of the rejected token.
		expired_at: OffsetDateTime,
	},
	/// Provider returned a non-retryable error status.
	#[error("API request failed with HTTP {status}: {message}.")]
	Api {
		/// HTTP status code.
		status: u16,
		/// Truncated response body.
		message: String,
	},
	/// The caller cancelled the operation.
	#[error("Operation was cancelled.")]
	Cancelled,
}
impl Error {
	/// Returns `true` when retrying the same call may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_))
	}

	/// Buckets the error into the remediation a caller should apply.
	pub fn class(&self) -> ErrorClass {
		match self {
			Self::Crypto(_) | Self::Authentication { .. } => ErrorClass::FixCredentials,
			Self::ExpiredSession { .. } => ErrorClass::Renegotiate,
			Self::Transient(_) | Self::Transport(_) => ErrorClass::RetryLater,
			Self::Config(_) | Self::Api { .. } | Self::Cancelled => ErrorClass::Fatal,
		}
	}
}

/// Remediation buckets for [`Error::class`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
	/// Key material or credentials are wrong; the operator must intervene.
	FixCredentials,
	/// The live session token must be negotiated again.
	Renegotiate,
	/// Temporary condition; try again later.
	RetryLater,
	/// Requested data has not settled yet (returned by pollers).
	NotYetAvailable,
	/// Programming or configuration error.
	Fatal,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A URL could not be parsed or joined.
	#[error("URL `{value}` is invalid.")]
	InvalidUrl {
		/// Offending URL or path fragment.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// API descriptor failed validation.
	#[error(transparent)]
	InvalidDescriptor(#[from] crate::provider::DescriptorError),
	/// Key material identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),

	/// A key material field has no configured source.
	#[error("Key material field `{field}` is not configured.")]
	MissingKeyField {
		/// Key material field name.
		field: &'static str,
	},
	/// An environment variable referenced by a key source is unset.
	#[error("Environment variable `{var}` is not set.")]
	MissingEnv {
		/// Variable name.
		var: String,
	},
	/// A key source file could not be read.
	#[error("Failed to read `{field}` from {path}.")]
	KeyFile {
		/// Key material field name.
		field: &'static str,
		/// Path that failed to load.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestBody(#[from] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Cryptographic failures (decryption, signing, Diffie-Hellman math).
#[derive(Debug, ThisError)]
pub enum CryptoError {
	/// RSA private key could not be parsed.
	#[error("The {field} is not a valid RSA private key: {message}.")]
	InvalidPrivateKey {
		/// Key material field name.
		field: &'static str,
		/// Parser diagnostic.
		message: String,
	},
	/// RSA decryption failed (malformed ciphertext or padding mismatch).
	#[error("Failed to decrypt the access token secret.")]
	Decrypt {
		/// Underlying RSA failure.
		#[source]
		source: rsa::Error,
	},
	/// RSA signing failed.
	#[error("Failed to produce the RSA-SHA256 signature: {message}.")]
	Sign {
		/// Signer diagnostic.
		message: String,
	},
	/// A hex-encoded value could not be decoded.
	#[error("Field `{field}` is not valid hex.")]
	InvalidHex {
		/// Field name.
		field: &'static str,
		/// Underlying decoding failure.
		#[source]
		source: hex::FromHexError,
	},
	/// A base64-encoded value could not be decoded.
	#[error("Field `{field}` is not valid base64.")]
	InvalidBase64 {
		/// Field name.
		field: &'static str,
		/// Underlying decoding failure.
		#[source]
		source: base64::DecodeError,
	},
	/// Diffie-Hellman prime failed validation.
	#[error("Diffie-Hellman prime is invalid: {reason}.")]
	InvalidPrime {
		/// Validation diagnostic.
		reason: &'static str,
	},
	/// Peer Diffie-Hellman value is outside the accepted range.
	#[error("Diffie-Hellman parameter rejected: {reason}.")]
	DhParameter {
		/// Validation diagnostic.
		reason: &'static str,
	},
	/// HMAC key setup failed.
	#[error("HMAC key could not be initialized.")]
	Mac(#[from] hmac::digest::InvalidLength),
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<StdDuration>,
	},
	/// Endpoint responded with JSON that could not be parsed.
	#[error("Endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// A single network call exceeded its deadline.
	#[error("Request timed out after {after:?}.")]
	Timeout {
		/// Configured per-call deadline.
		after: StdDuration,
	},
}
impl TransientError {
	/// Returns the upstream Retry-After hint, if any.
	pub fn retry_after(&self) -> Option<StdDuration> {
		match self {
			Self::Endpoint { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the API.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

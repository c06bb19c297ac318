//! OAuth 1.0a primitives: RFC 5849 encoding, signature base strings, nonces, and timestamps.

pub mod signer;

pub use signer::*;

// std
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
// crates.io
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::{Rng, distr::Alphanumeric};
use url::Position;
// self
use crate::{_prelude::*, http::HttpMethod};

/// Wire name of the consumer key parameter.
pub const OAUTH_CONSUMER_KEY: &str = "oauth_consumer_key";
/// Wire name of the access token parameter.
pub const OAUTH_TOKEN: &str = "oauth_token";
/// Wire name of the signature method parameter.
pub const OAUTH_SIGNATURE_METHOD: &str = "oauth_signature_method";
/// Wire name of the signature parameter.
pub const OAUTH_SIGNATURE: &str = "oauth_signature";
/// Wire name of the timestamp parameter.
pub const OAUTH_TIMESTAMP: &str = "oauth_timestamp";
/// Wire name of the nonce parameter.
pub const OAUTH_NONCE: &str = "oauth_nonce";
/// Wire name of the version parameter.
pub const OAUTH_VERSION: &str = "oauth_version";
/// Wire name of the Diffie-Hellman challenge parameter.
pub const DIFFIE_HELLMAN_CHALLENGE: &str = "diffie_hellman_challenge";

/// Characters left unescaped by RFC 5849 section 3.6.
const RFC5849: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');
const NONCE_RANDOM_LEN: usize = 16;

static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);
static CLOCK: MonotonicClock = MonotonicClock::new();

/// Signature methods understood by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureMethod {
	/// HMAC-SHA256 keyed by the live session token; used for every API call.
	HmacSha256,
	/// RSA-SHA256 with the consumer's signature key; used only for the token request.
	RsaSha256,
}
impl SignatureMethod {
	/// Wire value of `oauth_signature_method`.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::HmacSha256 => "HMAC-SHA256",
			Self::RsaSha256 => "RSA-SHA256",
		}
	}
}

/// Percent-encodes `value` per RFC 5849 (unreserved characters only stay literal).
pub fn percent_encode(value: &str) -> String {
	utf8_percent_encode(value, RFC5849).to_string()
}

/// Builds the signature base string
/// `METHOD&enc(base_uri)&enc(normalized_params)`.
///
/// Query parameters of `url` are merged with `params` before normalization; the fragment and
/// query are dropped from the base URI. `params` must not contain `oauth_signature` or `realm`.
pub fn signature_base_string(method: HttpMethod, url: &Url, params: &[(String, String)]) -> String {
	let mut encoded = url
		.query_pairs()
		.map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
		.chain(params.iter().map(|(k, v)| (percent_encode(k), percent_encode(v))))
		.collect::<Vec<_>>();

	encoded.sort();

	let normalized =
		encoded.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");

	format!(
		"{}&{}&{}",
		method.as_str(),
		percent_encode(&url[..Position::AfterPath]),
		percent_encode(&normalized)
	)
}

/// Returns a nonce that is unique for the lifetime of the process.
///
/// Sixteen random alphanumerics are followed by a hex counter, so two calls can never collide
/// even if the random part does.
pub fn next_nonce() -> String {
	let counter = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
	let mut nonce = rand::rng()
		.sample_iter(Alphanumeric)
		.take(NONCE_RANDOM_LEN)
		.map(char::from)
		.collect::<String>();

	nonce.push_str(&format!("{counter:x}"));

	nonce
}

/// Unix-second clock clamped so it never runs backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
	last: AtomicI64,
}
impl MonotonicClock {
	/// Creates a clock that has not issued a timestamp yet.
	pub const fn new() -> Self {
		Self { last: AtomicI64::new(0) }
	}

	/// Returns `now` as Unix seconds, never smaller than a previously returned value.
	pub fn timestamp(&self, now: OffsetDateTime) -> i64 {
		let candidate = now.unix_timestamp();
		let previous = self.last.fetch_max(candidate, Ordering::AcqRel);

		previous.max(candidate)
	}
}

/// Process-wide [`MonotonicClock::timestamp`].
pub fn monotonic_timestamp(now: OffsetDateTime) -> i64 {
	CLOCK.timestamp(now)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn encoding_matches_rfc5849() {
		assert_eq!(percent_encode("abcABC123"), "abcABC123");
		assert_eq!(percent_encode("-._~"), "-._~");
		assert_eq!(percent_encode("%"), "%25");
		assert_eq!(percent_encode("+"), "%2B");
		assert_eq!(percent_encode("&=*"), "%26%3D%2A");
		assert_eq!(percent_encode(" "), "%20");
		assert_eq!(percent_encode("\u{2766}"), "%E2%9D%A6");
	}

	#[test]
	fn base_string_matches_rfc5849_example() {
		let url = Url::parse("http://example.com/request?b5=%3D%253D&a3=a&c%40=&a2=r%20b").unwrap();
		let params = [
			("c2", ""),
			("a3", "2 q"),
			(OAUTH_CONSUMER_KEY, "9djdj82h48djs9d2"),
			(OAUTH_TOKEN, "kkk9d7dh3k39sjv7"),
			(OAUTH_SIGNATURE_METHOD, "HMAC-SHA1"),
			(OAUTH_TIMESTAMP, "137131201"),
			(OAUTH_NONCE, "7d8f3e4a"),
		]
		.map(|(k, v)| (k.to_owned(), v.to_owned()));

		assert_eq!(
			signature_base_string(HttpMethod::Post, &url, &params),
			"POST&http%3A%2F%2Fexample.com%2Frequest&a2%3Dr%2520b%26a3%3D2%2520q%26a3%3Da%26b5%3D%253D%25253D%26c%2540%3D%26c2%3D%26oauth_consumer_key%3D9djdj82h48djs9d2%26oauth_nonce%3D7d8f3e4a%26oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D137131201%26oauth_token%3Dkkk9d7dh3k39sjv7"
		);
	}

	#[test]
	fn base_uri_drops_default_port_and_fragment() {
		let url = Url::parse("HTTPS://API.example.com:443/v1/api/tickle#frag").unwrap();
		let base = signature_base_string(HttpMethod::Post, &url, &[]);

		assert_eq!(base, "POST&https%3A%2F%2Fapi.example.com%2Fv1%2Fapi%2Ftickle&");
	}

	#[test]
	fn nonces_are_alphanumeric() {
		let nonce = next_nonce();

		assert!(nonce.len() > 16);
		assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
	}

	#[test]
	fn timestamps_never_go_backwards() {
		let later = OffsetDateTime::from_unix_timestamp(4_000_000_000).unwrap();
		let earlier = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
		let clock = MonotonicClock::new();
		let first = clock.timestamp(later);

		assert_eq!(clock.timestamp(earlier), first);
		assert!(monotonic_timestamp(OffsetDateTime::now_utc()) > 0);
	}
}

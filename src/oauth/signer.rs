//! Per-request OAuth 1.0a signing keyed by the live session token.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::RsaPrivateKey;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ConsumerKey, LiveSessionToken, SecretBytes},
	crypto,
	http::{ApiRequest, HttpMethod},
	oauth::{self, SignatureMethod},
	provider::Realm,
};

const USER_AGENT: &str = concat!("oauth1a-session/", env!("CARGO_PKG_VERSION"));

/// Signs outbound calls on behalf of one consumer/access-token pair.
#[derive(Clone, Debug)]
pub struct RequestSigner {
	consumer_key: ConsumerKey,
	access_token: AccessToken,
	realm: Realm,
}
impl RequestSigner {
	/// Creates a signer for the given credentials and realm.
	pub fn new(consumer_key: ConsumerKey, access_token: AccessToken, realm: Realm) -> Self {
		Self { consumer_key, access_token, realm }
	}

	/// Realm attached to the `Authorization` header.
	pub fn realm(&self) -> &Realm {
		&self.realm
	}

	/// Signs a call with HMAC-SHA256 keyed by `lst`.
	///
	/// `params` are extra signed parameters that travel in the `Authorization` header alongside
	/// the `oauth_*` set; query parameters already on `url` are signed automatically. Fails with
	/// [`Error::ExpiredSession`] before doing any work when `lst` has expired.
	pub fn sign(
		&self,
		method: HttpMethod,
		url: &Url,
		params: &[(&str, &str)],
		lst: &LiveSessionToken,
	) -> Result<SignedRequest> {
		self.sign_at(method, url, params, lst, OffsetDateTime::now_utc())
	}

	/// [`RequestSigner::sign`] against an explicit clock reading.
	pub fn sign_at(
		&self,
		method: HttpMethod,
		url: &Url,
		params: &[(&str, &str)],
		lst: &LiveSessionToken,
		now: OffsetDateTime,
	) -> Result<SignedRequest> {
		if lst.is_expired_at(now) {
			return Err(Error::ExpiredSession { expired_at: lst.expires_at });
		}

		let oauth_params = self.oauth_params(SignatureMethod::HmacSha256, params, now, true);
		let base_string = oauth::signature_base_string(method, url, &oauth_params);
		let digest = crypto::hmac_sha256(lst.key_bytes(), base_string.as_bytes())?;

		Ok(SignedRequest {
			method,
			url: url.clone(),
			realm: self.realm.clone(),
			oauth_params,
			signature: STANDARD.encode(digest),
		})
	}

	/// Signs the live session token request with RSA-SHA256.
	///
	/// The base string is prefixed with the hex form of the decrypted access token secret and
	/// carries the Diffie-Hellman challenge as a signed parameter.
	pub fn sign_live_session_token_request(
		&self,
		url: &Url,
		challenge_hex: &str,
		prepend: &SecretBytes,
		signature_key: &RsaPrivateKey,
		now: OffsetDateTime,
	) -> Result<SignedRequest> {
		let oauth_params = self.oauth_params(
			SignatureMethod::RsaSha256,
			&[(oauth::DIFFIE_HELLMAN_CHALLENGE, challenge_hex)],
			now,
			false,
		);
		let base_string = format!(
			"{}{}",
			prepend.to_hex(),
			oauth::signature_base_string(HttpMethod::Post, url, &oauth_params)
		);
		let signature = crypto::sign_rsa_sha256(signature_key, base_string.as_bytes())?;

		Ok(SignedRequest {
			method: HttpMethod::Post,
			url: url.clone(),
			realm: self.realm.clone(),
			oauth_params,
			signature: STANDARD.encode(signature),
		})
	}

	fn oauth_params(
		&self,
		method: SignatureMethod,
		extra: &[(&str, &str)],
		now: OffsetDateTime,
		with_version: bool,
	) -> Vec<(String, String)> {
		let mut params = vec![
			(oauth::OAUTH_CONSUMER_KEY.to_owned(), self.consumer_key.as_str().to_owned()),
			(oauth::OAUTH_NONCE.to_owned(), oauth::next_nonce()),
			(oauth::OAUTH_SIGNATURE_METHOD.to_owned(), method.as_str().to_owned()),
			(oauth::OAUTH_TIMESTAMP.to_owned(), oauth::monotonic_timestamp(now).to_string()),
			(oauth::OAUTH_TOKEN.to_owned(), self.access_token.as_str().to_owned()),
		];

		if with_version {
			params.push((oauth::OAUTH_VERSION.to_owned(), "1.0".to_owned()));
		}

		params.extend(extra.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())));
		params.sort();

		params
	}
}

/// A fully signed request, built fresh for every call.
#[derive(Clone, Debug)]
pub struct SignedRequest {
	/// HTTP verb.
	pub method: HttpMethod,
	/// Target URL including the query string.
	pub url: Url,
	/// Realm rendered first in the header.
	pub realm: Realm,
	/// Signed header parameters, sorted by name (excludes `oauth_signature`).
	pub oauth_params: Vec<(String, String)>,
	/// Base64 signature.
	pub signature: String,
}
impl SignedRequest {
	/// Looks up a signed header parameter.
	pub fn param(&self, name: &str) -> Option<&str> {
		self.oauth_params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
	}

	/// Renders `OAuth realm="…", k="v", …` with sorted, percent-encoded values.
	pub fn authorization_header(&self) -> String {
		let mut params = self
			.oauth_params
			.iter()
			.map(|(k, v)| (k.as_str(), v.as_str()))
			.chain([(oauth::OAUTH_SIGNATURE, self.signature.as_str())])
			.collect::<Vec<_>>();

		params.sort();

		let rendered = params
			.into_iter()
			.map(|(k, v)| format!("{k}=\"{}\"", oauth::percent_encode(v)))
			.collect::<Vec<_>>()
			.join(", ");

		format!("OAuth realm=\"{}\", {rendered}", self.realm)
	}

	/// Converts into a transport request carrying the `Authorization` header.
	pub fn into_api_request(self) -> ApiRequest {
		let header = self.authorization_header();

		ApiRequest::new(self.method, self.url)
			.with_header("Authorization", header)
			.with_header("User-Agent", USER_AGENT)
			.with_header("Accept", "*/*")
	}
}

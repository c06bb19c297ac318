//! Live session token negotiation: decrypt, exchange, derive, verify.

// self
use crate::{
	_prelude::*,
	auth::{KeyMaterial, LiveSessionToken, SecretBytes},
	crypto::{self, DiffieHellmanState, SecretDecryptor},
	error::CryptoError,
	http::ApiTransport,
	obs::{self, OpKind},
	oauth::RequestSigner,
	provider::ApiDescriptor,
	session::{self, RetryPolicy, SessionConfig},
};

/// Provider reply to `POST oauth/live_session_token`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LiveSessionTokenResponse {
	/// Server Diffie-Hellman public value, hex.
	pub diffie_hellman_response: String,
	/// `hex(HMAC-SHA1(LST, consumer_key))`, used to verify the derived token.
	pub live_session_token_signature: String,
	/// Token expiry in Unix milliseconds.
	#[serde(default)]
	pub live_session_token_expiration: Option<i64>,
}

/// Performs the OAuth 1.0a Diffie-Hellman exchange that yields a [`LiveSessionToken`].
///
/// The access token secret is decrypted once at construction and kept (zeroized on drop) for
/// every later negotiation.
pub struct LiveSessionTokenNegotiator {
	material: Arc<KeyMaterial>,
	signer: RequestSigner,
	endpoint: Url,
	transport: Arc<dyn ApiTransport>,
	prepend: SecretBytes,
	retry: RetryPolicy,
	request_timeout: StdDuration,
}
impl LiveSessionTokenNegotiator {
	/// Prepares a negotiator, decrypting the access token secret up front.
	pub fn new(
		material: Arc<KeyMaterial>,
		descriptor: &ApiDescriptor,
		transport: Arc<dyn ApiTransport>,
		config: &SessionConfig,
	) -> Result<Self> {
		let prepend = SecretDecryptor::decrypt(
			material.encrypted_access_token_secret(),
			material.encryption_key(),
		)?;
		let signer = RequestSigner::new(
			material.consumer_key().clone(),
			material.access_token().clone(),
			descriptor.realm_for(material.consumer_key()),
		);

		Ok(Self {
			material,
			signer,
			endpoint: descriptor.endpoints.live_session_token.clone(),
			transport,
			prepend,
			retry: config.retry.clone(),
			request_timeout: config.request_timeout,
		})
	}

	/// Negotiates a fresh token, retrying transient failures under the configured policy.
	///
	/// Credential problems (`401`/`403`, signature mismatch, crypto failures) are returned
	/// immediately and never retried.
	pub async fn negotiate(&self) -> Result<LiveSessionToken> {
		let mut backoff = self.retry.backoff();

		loop {
			match self.negotiate_once().await {
				Ok(lst) => return Ok(lst),
				Err(Error::Authentication { reason }) =>
					return Err(Error::Authentication {
						reason: format!("{reason}; check the consumer key material"),
					}),
				Err(e) if e.is_retryable() => {
					let Some(delay) = backoff.next_backoff(session::retry_after(&e)) else {
						return Err(e);
					};

					obs::log_retry(OpKind::Negotiate, backoff.attempt(), delay, &e);
					tokio::time::sleep(delay).await;
				},
				Err(e) => return Err(e),
			}
		}
	}

	async fn negotiate_once(&self) -> Result<LiveSessionToken> {
		let state = self.material.dh().generate();
		let now = OffsetDateTime::now_utc();
		let signed = self.signer.sign_live_session_token_request(
			&self.endpoint,
			&state.challenge_hex(),
			&self.prepend,
			self.material.signature_key(),
			now,
		)?;
		let request = signed.into_api_request().with_timeout(self.request_timeout);
		let response = session::send_with_timeout(self.transport.as_ref(), request, self.request_timeout)
			.await?
			.error_for_status()?;
		let body = response.json::<LiveSessionTokenResponse>()?;

		self.derive_token(state, &body, OffsetDateTime::now_utc())
	}

	/// Derives and verifies the token from the provider's reply.
	///
	/// `LST = HMAC-SHA1(K, prepend)` where `K` is the shared secret; the provider proves it
	/// derived the same value by returning `hex(HMAC-SHA1(LST, consumer_key))`.
	pub fn derive_token(
		&self,
		state: DiffieHellmanState,
		response: &LiveSessionTokenResponse,
		now: OffsetDateTime,
	) -> Result<LiveSessionToken> {
		let server_public =
			crypto::parse_public_value("diffie_hellman_response", &response.diffie_hellman_response)?;
		let shared = self.material.dh().derive_shared(state, &server_public)?;
		let key = crypto::hmac_sha1(shared.expose(), self.prepend.expose())?;
		let expected = hex::decode(response.live_session_token_signature.trim()).map_err(|source| {
			CryptoError::InvalidHex { field: "live_session_token_signature", source }
		})?;

		if !crypto::verify_hmac_sha1(&key, self.material.consumer_key().as_str().as_bytes(), &expected)?
		{
			return Err(Error::Authentication {
				reason: "live session token signature mismatch, possible tampering".into(),
			});
		}

		let expires_at = match response.live_session_token_expiration {
			Some(millis) => OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
				.unwrap_or(now + LiveSessionToken::DEFAULT_LIFETIME),
			None => now + LiveSessionToken::DEFAULT_LIFETIME,
		};

		obs::log_negotiated(&self.material.consumer_key().masked(), expires_at);

		Ok(LiveSessionToken::new(key, now, expires_at))
	}
}
impl Debug for LiveSessionTokenNegotiator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LiveSessionTokenNegotiator")
			.field("consumer_key", self.material.consumer_key())
			.field("endpoint", &self.endpoint.as_str())
			.field("prepend", &self.prepend)
			.finish()
	}
}

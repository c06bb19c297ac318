//! Scripted in-process provider shared by the session integration tests.
//!
//! It plays the server side of the live session token exchange, verifies the RSA and HMAC
//! signatures of every call it receives, and serves canned bodies for the brokerage endpoints.

#![allow(dead_code)]

// std
use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use rsa::{
	Pkcs1v15Encrypt, RsaPrivateKey,
	pkcs1v15::{Signature, VerifyingKey},
	rand_core::OsRng,
	signature::Verifier,
};
use serde_json::{Value, json};
use sha2::Sha256;
use time::OffsetDateTime;
// self
use oauth1a_session::{
	auth::{AccessToken, ConsumerKey, KeyMaterial},
	crypto::{self, DiffieHellmanAgreement},
	http::{ApiRequest, ApiResponse, ApiTransport, HttpMethod, TransportFuture},
	oauth,
	provider::ApiDescriptor,
	session::{RetryPolicy, Session, SessionConfig},
};

pub const CONSUMER_KEY: &str = "TESTCONS";
pub const ACCESS_TOKEN: &str = "a1b2c3d4e5f6";
pub const PREPEND: &[u8] = b"decrypted-access-token-secret";

pub fn encryption_key() -> RsaPrivateKey {
	crypto::parse_rsa_private_key(
		"encryption_key",
		include_str!("../fixtures/encryption_key.pem"),
	)
	.expect("Encryption key fixture should parse.")
}

pub fn signature_key() -> RsaPrivateKey {
	crypto::parse_rsa_private_key("signature_key", include_str!("../fixtures/signature_key.pem"))
		.expect("Signature key fixture should parse.")
}

pub fn dh() -> DiffieHellmanAgreement {
	DiffieHellmanAgreement::from_hex(include_str!("../fixtures/dh_prime.hex"))
		.expect("DH prime fixture should parse.")
}

pub fn material() -> KeyMaterial {
	let encryption_key = encryption_key();
	let ciphertext = encryption_key
		.to_public_key()
		.encrypt(&mut OsRng, Pkcs1v15Encrypt, PREPEND)
		.expect("Fixture secret should encrypt.");

	KeyMaterial::from_parts(
		ConsumerKey::new(CONSUMER_KEY).expect("Consumer key fixture should be valid."),
		AccessToken::new(ACCESS_TOKEN).expect("Access token fixture should be valid."),
		ciphertext,
		dh(),
		encryption_key,
		signature_key(),
	)
}

pub fn descriptor() -> ApiDescriptor {
	ApiDescriptor::production().expect("Production descriptor should build.")
}

pub fn fast_config() -> SessionConfig {
	SessionConfig::default()
		.with_request_timeout(StdDuration::from_secs(2))
		.with_retry(
			RetryPolicy::default()
				.with_initial_backoff(StdDuration::from_millis(5))
				.with_max_backoff(StdDuration::from_millis(20)),
		)
}

pub fn session(provider: &Arc<ScriptedProvider>) -> Session {
	session_with(provider, fast_config())
}

pub fn session_with(provider: &Arc<ScriptedProvider>, config: SessionConfig) -> Session {
	Session::new(material(), descriptor(), provider.clone(), config)
		.expect("Session should build from fixtures.")
}

/// Canned reply for one endpoint call.
#[derive(Clone, Debug)]
pub enum Reply {
	/// Serve the endpoint normally.
	Normal,
	/// Return this status with an empty body.
	Status(u16),
	/// Never answer.
	Hang,
}

#[derive(Default)]
struct Script {
	lst: Option<Vec<u8>>,
	calls: Vec<(HttpMethod, String)>,
	replies: HashMap<&'static str, Vec<Reply>>,
	snapshot_requests: Vec<Vec<u64>>,
	snapshot_seen: HashMap<u64, usize>,
	snapshot_ready_after: HashMap<u64, usize>,
	token_lifetime: Option<StdDuration>,
	negotiation_delay: Option<StdDuration>,
}

/// In-process stand-in for the brokerage web API.
#[derive(Default)]
pub struct ScriptedProvider {
	script: Mutex<Script>,
	negotiations: AtomicUsize,
	signed_calls: AtomicUsize,
	rejected: AtomicUsize,
}
impl ScriptedProvider {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Queues replies for an endpoint (`"tickle"`, `"snapshot"`, `"lst"`, ...), consumed in order.
	pub fn script(&self, endpoint: &'static str, replies: impl IntoIterator<Item = Reply>) {
		self.script.lock().replies.entry(endpoint).or_default().extend(replies);
	}

	/// Makes the next signed call fail verification, as if the server dropped the token.
	pub fn forget_token(&self) {
		self.script.lock().lst = None;
	}

	/// Tokens negotiated from now on expire this long after issue instead of after a day.
	pub fn set_token_lifetime(&self, lifetime: StdDuration) {
		self.script.lock().token_lifetime = Some(lifetime);
	}

	pub fn set_negotiation_delay(&self, delay: StdDuration) {
		self.script.lock().negotiation_delay = Some(delay);
	}

	/// Field `31` appears for `conid` only once it was requested `rounds` times.
	pub fn snapshot_ready_after(&self, conid: u64, rounds: usize) {
		self.script.lock().snapshot_ready_after.insert(conid, rounds);
	}

	pub fn negotiations(&self) -> usize {
		self.negotiations.load(Ordering::SeqCst)
	}

	pub fn signed_calls(&self) -> usize {
		self.signed_calls.load(Ordering::SeqCst)
	}

	pub fn rejected(&self) -> usize {
		self.rejected.load(Ordering::SeqCst)
	}

	pub fn calls_to(&self, suffix: &str) -> usize {
		self.script.lock().calls.iter().filter(|(_, path)| path.ends_with(suffix)).count()
	}

	pub fn snapshot_requests(&self) -> Vec<Vec<u64>> {
		self.script.lock().snapshot_requests.clone()
	}

	pub fn current_lst(&self) -> Option<Vec<u8>> {
		self.script.lock().lst.clone()
	}

	fn next_reply(&self, endpoint: &'static str) -> Reply {
		let mut script = self.script.lock();

		match script.replies.get_mut(endpoint) {
			Some(queue) if !queue.is_empty() => queue.remove(0),
			_ => Reply::Normal,
		}
	}

	async fn handle(&self, request: ApiRequest) -> ApiResponse {
		let path = request.url.path().to_owned();

		self.script.lock().calls.push((request.method, path.clone()));

		let endpoint = endpoint_name(&path);

		match self.next_reply(endpoint) {
			Reply::Normal => {},
			Reply::Status(status) => return ApiResponse::new(status, ""),
			Reply::Hang => std::future::pending::<()>().await,
		}

		if endpoint == "lst" {
			return self.negotiate(&request).await;
		}
		if !self.verify_hmac(&request) {
			self.rejected.fetch_add(1, Ordering::SeqCst);

			return ApiResponse::new(401, r#"{"error":"invalid signature"}"#);
		}

		self.signed_calls.fetch_add(1, Ordering::SeqCst);

		match endpoint {
			"tickle" => json_response(json!({
				"session": "0f1e2d3c",
				"iserver": {
					"authStatus": { "authenticated": true, "competing": false, "connected": true }
				}
			})),
			"init" => {
				let body = request.body.as_deref().map(serde_json::from_slice::<Value>);

				assert_eq!(
					body.and_then(Result::ok),
					Some(json!({ "publish": true, "compete": true })),
					"Brokerage init should carry publish/compete.",
				);

				json_response(json!({ "authenticated": true, "competing": false, "connected": true }))
			},
			"logout" => json_response(json!({ "status": true })),
			"snapshot" => self.snapshot(&request),
			_ => json_response(json!({ "path": path })),
		}
	}

	async fn negotiate(&self, request: &ApiRequest) -> ApiResponse {
		let delay = self.script.lock().negotiation_delay;

		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let params = authorization_params(request);

		assert_eq!(lookup(&params, "realm"), Some("test_realm"));
		assert_eq!(lookup(&params, oauth::OAUTH_SIGNATURE_METHOD), Some("RSA-SHA256"));
		assert_eq!(lookup(&params, oauth::OAUTH_VERSION), None);

		let signature = STANDARD
			.decode(lookup(&params, oauth::OAUTH_SIGNATURE).expect("Signature should be present."))
			.expect("Signature should be base64.");
		let signed = signed_params(&params);
		let base = format!(
			"{}{}",
			hex::encode(PREPEND),
			oauth::signature_base_string(HttpMethod::Post, &request.url, &signed)
		);
		let signature =
			Signature::try_from(signature.as_slice()).expect("Signature should decode.");

		if VerifyingKey::<Sha256>::new(signature_key().to_public_key())
			.verify(base.as_bytes(), &signature)
			.is_err()
		{
			return ApiResponse::new(401, r#"{"error":"bad rsa signature"}"#);
		}

		let challenge = crypto::parse_public_value(
			"diffie_hellman_challenge",
			lookup(&params, oauth::DIFFIE_HELLMAN_CHALLENGE).expect("Challenge should be present."),
		)
		.expect("Challenge should be hex.");
		let dh = dh();
		let server = dh.generate();
		let response = server.challenge_hex();
		let shared = dh.derive_shared(server, &challenge).expect("Challenge should be in range.");
		let lst = crypto::hmac_sha1(shared.expose(), PREPEND).expect("HMAC accepts any key.");
		let proof = crypto::hmac_sha1(&lst, CONSUMER_KEY.as_bytes()).expect("HMAC accepts any key.");
		let expiration = {
			let mut script = self.script.lock();

			script.lst = Some(lst);

			let lifetime = script.token_lifetime.unwrap_or(StdDuration::from_secs(86_400));
			let expires_at = OffsetDateTime::now_utc() + lifetime;

			(expires_at.unix_timestamp_nanos() / 1_000_000) as i64
		};

		self.negotiations.fetch_add(1, Ordering::SeqCst);

		json_response(json!({
			"diffie_hellman_response": response,
			"live_session_token_signature": hex::encode(proof),
			"live_session_token_expiration": expiration,
		}))
	}

	fn verify_hmac(&self, request: &ApiRequest) -> bool {
		let Some(lst) = self.current_lst() else {
			return false;
		};
		let params = authorization_params(request);

		if lookup(&params, oauth::OAUTH_SIGNATURE_METHOD) != Some("HMAC-SHA256")
			|| lookup(&params, oauth::OAUTH_VERSION) != Some("1.0")
			|| lookup(&params, oauth::OAUTH_CONSUMER_KEY) != Some(CONSUMER_KEY)
			|| lookup(&params, oauth::OAUTH_TOKEN) != Some(ACCESS_TOKEN)
		{
			return false;
		}

		let Some(signature) = lookup(&params, oauth::OAUTH_SIGNATURE) else {
			return false;
		};
		let base = oauth::signature_base_string(request.method, &request.url, &signed_params(&params));
		let expected =
			STANDARD.encode(crypto::hmac_sha256(&lst, base.as_bytes()).expect("HMAC accepts any key."));

		expected == signature
	}

	fn snapshot(&self, request: &ApiRequest) -> ApiResponse {
		let conids = request
			.url
			.query_pairs()
			.find(|(k, _)| k == "conids")
			.map(|(_, v)| v.split(',').filter_map(|id| id.parse::<u64>().ok()).collect::<Vec<_>>())
			.unwrap_or_default();
		let mut script = self.script.lock();

		script.snapshot_requests.push(conids.clone());

		let rows = conids
			.into_iter()
			.map(|conid| {
				let seen = {
					let seen = script.snapshot_seen.entry(conid).or_default();

					*seen += 1;

					*seen
				};
				let ready_after = script.snapshot_ready_after.get(&conid).copied().unwrap_or(1);

				if seen >= ready_after {
					json!({ "conid": conid, "31": format!("{}.25", conid % 1000), "6509": "RpB" })
				} else {
					json!({ "conid": conid.to_string(), "6509": "Z" })
				}
			})
			.collect::<Vec<_>>();

		json_response(Value::Array(rows))
	}
}
impl ApiTransport for ScriptedProvider {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		Box::pin(async move { Ok(self.handle(request).await) })
	}
}

fn endpoint_name(path: &str) -> &'static str {
	if path.ends_with("oauth/live_session_token") {
		"lst"
	} else if path.ends_with("tickle") {
		"tickle"
	} else if path.ends_with("iserver/auth/ssodh/init") {
		"init"
	} else if path.ends_with("logout") {
		"logout"
	} else if path.ends_with("iserver/marketdata/snapshot") {
		"snapshot"
	} else {
		"other"
	}
}

fn json_response(body: Value) -> ApiResponse {
	ApiResponse::new(200, body.to_string())
}

/// Parses `OAuth realm="…", k="v", …` into decoded pairs.
pub fn authorization_params(request: &ApiRequest) -> Vec<(String, String)> {
	let header = request.header("Authorization").expect("Signed calls carry Authorization.");
	let rest = header.strip_prefix("OAuth ").expect("Header should use the OAuth scheme.");

	rest.split(", ")
		.filter_map(|pair| {
			let (k, v) = pair.split_once('=')?;
			let v = v.trim_matches('"');
			let decoded = percent_decode_str(v).decode_utf8().ok()?.into_owned();

			Some((k.to_owned(), decoded))
		})
		.collect()
}

fn lookup<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
	params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn signed_params(params: &[(String, String)]) -> Vec<(String, String)> {
	params
		.iter()
		.filter(|(k, _)| k != "realm" && k != oauth::OAUTH_SIGNATURE)
		.cloned()
		.collect()
}

//! Signed session facade: negotiation, signing, keep-alive, and snapshot polling.
//!
//! A [`Session`] owns the key material, the current live session token, and the transport.
//! Signed calls negotiate a token on first use, refresh it shortly before it expires, and
//! re-negotiate once when the provider rejects a signature with `401`. Concurrent callers that
//! need a new token share a single exchange behind the context's negotiation guard.

pub mod brokerage;
pub mod negotiate;
pub mod tickler;

mod context;
mod metrics;
mod retry;

pub use brokerage::*;
pub use context::SessionContext;
pub use metrics::SessionMetrics;
pub use negotiate::*;
pub use retry::*;
pub use tickler::*;

// crates.io
use serde::de::DeserializeOwned;
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{KeyMaterial, LiveSessionToken},
	error::TransientError,
	http::{ApiRequest, ApiResponse, ApiTransport, HttpMethod},
	oauth::RequestSigner,
	obs::{self, OpKind, OpOutcome, OpSpan},
	poll::{BatchOutcome, PollPolicy, SnapshotPoller},
	provider::ApiDescriptor,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Session tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
	/// Deadline applied to every transport call.
	pub request_timeout: StdDuration,
	/// Tokens expiring within this window are renewed before signing.
	pub refresh_margin: Duration,
	/// Backoff for negotiation and signed calls.
	pub retry: RetryPolicy,
}
impl SessionConfig {
	/// Overrides the per-call deadline.
	pub fn with_request_timeout(mut self, request_timeout: StdDuration) -> Self {
		self.request_timeout = request_timeout;

		self
	}

	/// Overrides the proactive refresh window.
	pub fn with_refresh_margin(mut self, refresh_margin: Duration) -> Self {
		self.refresh_margin = refresh_margin;

		self
	}

	/// Overrides the retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}
}
impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			request_timeout: StdDuration::from_secs(15),
			refresh_margin: Duration::seconds(60),
			retry: RetryPolicy::default(),
		}
	}
}

/// Cloneable handle to one signed brokerage session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}
impl Session {
	/// Builds a session over an arbitrary transport.
	///
	/// The access token secret is decrypted here, so bad key material fails fast without any
	/// network traffic.
	pub fn new(
		material: KeyMaterial,
		descriptor: ApiDescriptor,
		transport: impl ApiTransport,
		config: SessionConfig,
	) -> Result<Self> {
		let material = Arc::new(material);
		let transport: Arc<dyn ApiTransport> = Arc::new(transport);
		let negotiator =
			LiveSessionTokenNegotiator::new(material.clone(), &descriptor, transport.clone(), &config)?;
		let signer = RequestSigner::new(
			material.consumer_key().clone(),
			material.access_token().clone(),
			descriptor.realm_for(material.consumer_key()),
		);

		Ok(Self {
			inner: Arc::new(SessionInner {
				descriptor,
				transport,
				signer,
				negotiator,
				context: SessionContext::new(),
				config,
				metrics: Default::default(),
			}),
		})
	}

	/// Builds a session backed by the default reqwest transport.
	#[cfg(feature = "reqwest")]
	pub fn with_reqwest(
		material: KeyMaterial,
		descriptor: ApiDescriptor,
		config: SessionConfig,
	) -> Result<Self> {
		Self::new(material, descriptor, ReqwestHttpClient::new()?, config)
	}

	/// Descriptor the session was built with.
	pub fn descriptor(&self) -> &ApiDescriptor {
		&self.inner.descriptor
	}

	/// Active configuration.
	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	/// Token holder shared by every clone of this session.
	pub fn context(&self) -> &SessionContext {
		&self.inner.context
	}

	/// Negotiation and keep-alive counters.
	pub fn metrics(&self) -> &SessionMetrics {
		&self.inner.metrics
	}

	/// Creates a stopped keep-alive task bound to this session.
	pub fn tickler(&self, config: TicklerConfig) -> SessionTickler {
		SessionTickler::new(self.clone(), config)
	}

	/// Returns a token that stays valid for at least the refresh margin, negotiating if needed.
	pub async fn live_session_token(&self) -> Result<Arc<LiveSessionToken>> {
		let margin = self.inner.config.refresh_margin;

		if let Some(lst) = self.inner.context.usable(margin, OffsetDateTime::now_utc()) {
			return Ok(lst);
		}

		let _singleflight = self.inner.context.negotiation_guard().lock().await;

		// Another caller may have finished negotiating while this one waited.
		if let Some(lst) = self.inner.context.usable(margin, OffsetDateTime::now_utc()) {
			return Ok(lst);
		}

		self.negotiate_locked().await
	}

	/// Negotiates a new token unconditionally and installs it.
	pub async fn negotiate(&self) -> Result<Arc<LiveSessionToken>> {
		let _singleflight = self.inner.context.negotiation_guard().lock().await;

		self.negotiate_locked().await
	}

	/// Sends a signed call to `path` (relative to the descriptor's base URL).
	///
	/// Non-2xx statuses become errors; see [`ApiResponse::into_error`]. A `401` triggers one
	/// re-negotiation and replay; transient failures back off under the session's retry policy.
	pub async fn request(
		&self,
		method: HttpMethod,
		path: &str,
		body: Option<&Value>,
	) -> Result<ApiResponse> {
		let url = self.inner.descriptor.endpoint(path)?;

		self.send_signed(OpKind::Request, method, &url, body, &self.inner.config.retry).await
	}

	/// [`Session::request`] followed by JSON decoding.
	pub async fn request_json<T>(
		&self,
		method: HttpMethod,
		path: &str,
		body: Option<&Value>,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		Ok(self.request(method, path, body).await?.json()?)
	}

	/// Calls the keep-alive endpoint once.
	///
	/// Uses the same token path as [`Session::request`]: a missing or nearly expired token is
	/// negotiated first, and a `401` is retried once after re-negotiation. The tickler owns the
	/// retry budget, so transient failures are returned immediately.
	pub async fn tickle(&self) -> Result<TickleStatus> {
		self.inner.metrics.record_tickle();

		let result = self
			.send_signed(
				OpKind::Tickle,
				HttpMethod::Post,
				&self.inner.descriptor.endpoints.tickle,
				None,
				&RetryPolicy::none(),
			)
			.await
			.and_then(|response| Ok(response.json::<Value>()?));

		match result {
			Ok(body) => Ok(TickleStatus::from_value(&body)),
			Err(e) => {
				self.inner.metrics.record_tickle_failure();

				Err(e)
			},
		}
	}

	/// Opens the brokerage session (`publish` and `compete` set) and returns its status.
	pub async fn init_brokerage_session(&self) -> Result<AuthStatus> {
		let body = serde_json::json!({ "publish": true, "compete": true });
		let response = self
			.send_signed(
				OpKind::BrokerageInit,
				HttpMethod::Post,
				&self.inner.descriptor.endpoints.brokerage_init,
				Some(&body),
				&self.inner.config.retry,
			)
			.await?;

		Ok(AuthStatus::from_value(&response.json::<Value>()?))
	}

	/// Ends the provider session and drops the local token, even when the call fails.
	pub async fn logout(&self) -> Result<()> {
		let result = match self.inner.context.current() {
			Some(lst) => self
				.send_signed_with(
					OpKind::Logout,
					HttpMethod::Post,
					&self.inner.descriptor.endpoints.logout,
					None,
					lst,
				)
				.await
				.map(drop),
			None => Ok(()),
		};

		self.inner.context.clear();

		result
	}

	/// Polls the market data snapshot endpoint until every conid carries the required fields.
	///
	/// Only still-pending conids are re-requested. Each round trip is a single signed call; the
	/// poll policy owns the retry budget.
	pub async fn market_snapshot(
		&self,
		query: &SnapshotQuery,
		policy: PollPolicy,
		cancel: &CancellationToken,
	) -> BatchOutcome<u64, SnapshotRow> {
		let span = OpSpan::new(OpKind::Poll, "market_snapshot");
		let fields = query.fields_param();
		let fields = fields.as_str();
		let poller = SnapshotPoller::new(policy);

		span.instrument(poller.poll_batch(
			query.conids.iter().copied(),
			move |pending| self.fetch_snapshot(pending, fields),
			|_, row| query.is_ready(row),
			cancel,
		))
		.await
	}

	async fn fetch_snapshot(&self, conids: Vec<u64>, fields: &str) -> Result<Vec<(u64, SnapshotRow)>> {
		let mut url = self.inner.descriptor.endpoints.market_snapshot.clone();

		url.query_pairs_mut()
			.append_pair("conids", &brokerage::conids_param(&conids))
			.append_pair("fields", fields);

		let response = self
			.send_signed(OpKind::Poll, HttpMethod::Get, &url, None, &RetryPolicy::none())
			.await?;

		Ok(brokerage::snapshot_rows(response.json()?))
	}

	async fn negotiate_locked(&self) -> Result<Arc<LiveSessionToken>> {
		const KIND: OpKind = OpKind::Negotiate;

		let span = OpSpan::new(KIND, "negotiate");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.inner.metrics.record_negotiation_attempt();

		let result = span.instrument(self.inner.negotiator.negotiate()).await;

		match result {
			Ok(lst) => {
				obs::record_op_outcome(KIND, OpOutcome::Success);
				self.inner.metrics.record_negotiation_success();

				Ok(self.inner.context.store(lst))
			},
			Err(e) => {
				obs::record_op_outcome(KIND, OpOutcome::Failure);
				self.inner.metrics.record_negotiation_failure();

				Err(e)
			},
		}
	}

	/// Re-negotiates unless another caller already replaced the token seen at `stale`.
	async fn renegotiate_after(&self, stale: u64) -> Result<Arc<LiveSessionToken>> {
		let _singleflight = self.inner.context.negotiation_guard().lock().await;

		if self.inner.context.generation() != stale {
			if let Some(lst) = self.inner.context.current() {
				return Ok(lst);
			}
		}

		self.negotiate_locked().await
	}

	async fn send_signed(
		&self,
		kind: OpKind,
		method: HttpMethod,
		url: &Url,
		body: Option<&Value>,
		retry: &RetryPolicy,
	) -> Result<ApiResponse> {
		let span = OpSpan::new(kind, "send_signed");

		obs::record_op_outcome(kind, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let mut backoff = retry.backoff();
				let mut renegotiated = false;
				let mut lst = self.live_session_token().await?;

				loop {
					let generation = self.inner.context.generation();
					let request = self.build_request(method, url, body, &lst)?;

					match self.dispatch(request).await {
						Ok(response) => return Ok(response),
						Err(Error::Authentication { .. }) if !renegotiated => {
							renegotiated = true;
							lst = self.renegotiate_after(generation).await?;
						},
						Err(e) if e.is_retryable() => {
							let Some(delay) = backoff.next_backoff(retry_after(&e)) else {
								return Err(e);
							};

							obs::record_op_outcome(kind, OpOutcome::Retry);
							obs::log_retry(kind, backoff.attempt(), delay, &e);
							tokio::time::sleep(delay).await;

							lst = self.live_session_token().await?;
						},
						Err(e) => return Err(e),
					}
				}
			})
			.await;

		record_result(kind, &result);

		result
	}

	/// Single signed call with a caller-supplied token; no negotiation, no retries.
	async fn send_signed_with(
		&self,
		kind: OpKind,
		method: HttpMethod,
		url: &Url,
		body: Option<&Value>,
		lst: Arc<LiveSessionToken>,
	) -> Result<ApiResponse> {
		let span = OpSpan::new(kind, "send_signed");

		obs::record_op_outcome(kind, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let request = self.build_request(method, url, body, &lst)?;

				self.dispatch(request).await
			})
			.await;

		record_result(kind, &result);

		result
	}

	fn build_request(
		&self,
		method: HttpMethod,
		url: &Url,
		body: Option<&Value>,
		lst: &LiveSessionToken,
	) -> Result<ApiRequest> {
		let request = self
			.inner
			.signer
			.sign(method, url, &[], lst)?
			.into_api_request()
			.with_timeout(self.inner.config.request_timeout);

		Ok(match body {
			Some(body) => request.with_json(body)?,
			None => request,
		})
	}

	async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
		send_with_timeout(self.inner.transport.as_ref(), request, self.inner.config.request_timeout)
			.await?
			.error_for_status()
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("base_url", &self.inner.descriptor.base_url.as_str())
			.field("realm", &self.inner.signer.realm().as_str())
			.field("generation", &self.inner.context.generation())
			.field("config", &self.inner.config)
			.finish()
	}
}

struct SessionInner {
	descriptor: ApiDescriptor,
	transport: Arc<dyn ApiTransport>,
	signer: RequestSigner,
	negotiator: LiveSessionTokenNegotiator,
	context: SessionContext,
	config: SessionConfig,
	metrics: SessionMetrics,
}

/// Sends `request`, converting an elapsed deadline into [`TransientError::Timeout`].
pub(crate) async fn send_with_timeout(
	transport: &dyn ApiTransport,
	request: ApiRequest,
	timeout: StdDuration,
) -> Result<ApiResponse> {
	match tokio::time::timeout(timeout, transport.send(request)).await {
		Ok(result) => result,
		Err(_) => Err(TransientError::Timeout { after: timeout }.into()),
	}
}

pub(crate) fn retry_after(error: &Error) -> Option<StdDuration> {
	match error {
		Error::Transient(e) => e.retry_after(),
		_ => None,
	}
}

fn record_result<T>(kind: OpKind, result: &Result<T>) {
	match result {
		Ok(_) => obs::record_op_outcome(kind, OpOutcome::Success),
		Err(_) => obs::record_op_outcome(kind, OpOutcome::Failure),
	}
}

//! Transport seam between signed requests and an HTTP stack.
//!
//! The session only needs "send a request, get status and body back", so [`ApiTransport`] is the
//! crate's single dependency on an HTTP client. [`ReqwestHttpClient`] is the default
//! implementation; tests and alternative stacks implement the trait directly.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError},
};
#[cfg(feature = "reqwest")] use crate::error::TransportError;

/// Boxed future returned by [`ApiTransport::send`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + 'a + Send>>;

/// Executes already-signed API requests.
///
/// Implementations must be `Send + Sync + 'static` so one transport can back a session, its
/// tickler task, and concurrent pollers. Non-2xx statuses are returned as responses, not errors;
/// only failures to obtain a response (network, IO, timeouts) surface as [`Error`].
pub trait ApiTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves to the provider's raw response.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}
impl<T> ApiTransport for Arc<T>
where
	T: ?Sized + ApiTransport,
{
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		(**self).send(request)
	}
}

/// HTTP verbs used against the web API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `DELETE`
	Delete,
}
impl HttpMethod {
	/// Uppercase verb as used in OAuth base strings.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outbound request handed to an [`ApiTransport`].
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP verb.
	pub method: HttpMethod,
	/// Absolute URL including any query string.
	pub url: Url,
	/// Header name/value pairs, in insertion order.
	pub headers: Vec<(String, String)>,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	/// Per-call deadline enforced by the transport, when supported.
	pub timeout: Option<StdDuration>,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: HttpMethod, url: Url) -> Self {
		Self { method, url, headers: Vec::new(), body: None, timeout: None }
	}

	/// Appends a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Serializes `body` as JSON and sets the content type.
	pub fn with_json<T>(mut self, body: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(body)?);

		Ok(self.with_header("Content-Type", "application/json"))
	}

	/// Sets the per-call deadline.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Returns the first header matching `name` case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
	}
}

/// Raw response captured by an [`ApiTransport`].
#[derive(Clone, Debug, Default)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response body bytes.
	pub body: Vec<u8>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<StdDuration>,
}
impl ApiResponse {
	/// Creates a response with the given status and body.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, body: body.into(), retry_after: None }
	}

	/// Sets the Retry-After hint.
	pub fn with_retry_after(mut self, retry_after: StdDuration) -> Self {
		self.retry_after = Some(retry_after);

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Parses the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T, TransientError>
	where
		T: DeserializeOwned,
	{
		let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) { b"null" } else { &self.body };
		let mut de = serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(&mut de)
			.map_err(|source| TransientError::ResponseParse { source, status: Some(self.status) })
	}

	/// Passes 2xx responses through and maps everything else onto the error taxonomy.
	pub fn error_for_status(self) -> Result<Self> {
		if self.is_success() { Ok(self) } else { Err(self.into_error()) }
	}

	/// Maps a non-2xx response onto the error taxonomy.
	///
	/// `401`/`403` become [`Error::Authentication`], `408`/`429`/`5xx` become retryable
	/// [`TransientError::Endpoint`], and any other status becomes [`Error::Api`].
	pub fn into_error(self) -> Error {
		let message = self.body_excerpt();

		match categorize_status(self.status) {
			StatusCategory::Unauthorized => Error::Authentication {
				reason: format!("provider returned HTTP {}: {message}", self.status),
			},
			StatusCategory::RateLimited | StatusCategory::Retryable => TransientError::Endpoint {
				message,
				status: Some(self.status),
				retry_after: self.retry_after,
			}
			.into(),
			StatusCategory::Fatal => Error::Api { status: self.status, message },
		}
	}

	/// Lossy UTF-8 body trimmed to a log-safe length.
	pub fn body_excerpt(&self) -> String {
		const MAX: usize = 256;

		let text = String::from_utf8_lossy(&self.body);
		let text = text.trim();

		if text.chars().count() <= MAX {
			return text.to_owned();
		}

		let mut out = text.chars().take(MAX).collect::<String>();

		out.push('…');

		out
	}
}

/// Retry disposition of an HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCategory {
	/// `401`/`403`.
	Unauthorized,
	/// `429`.
	RateLimited,
	/// `408` and `5xx`.
	Retryable,
	/// Anything else outside `2xx`.
	Fatal,
}

/// Categorizes a non-2xx HTTP status for retry handling.
pub fn categorize_status(status: u16) -> StatusCategory {
	match status {
		401 | 403 => StatusCategory::Unauthorized,
		429 => StatusCategory::RateLimited,
		408 | 500..=599 => StatusCategory::Retryable,
		_ => StatusCategory::Fatal,
	}
}

/// Thin wrapper around [`ReqwestClient`] implementing [`ApiTransport`].
///
/// Redirects should stay disabled on custom clients so a signed request is never replayed
/// against another origin.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client with redirects disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client =
			ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl ApiTransport for ReqwestHttpClient {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				HttpMethod::Get => reqwest::Method::GET,
				HttpMethod::Post => reqwest::Method::POST,
				HttpMethod::Put => reqwest::Method::PUT,
				HttpMethod::Delete => reqwest::Method::DELETE,
			};
			let mut builder = client.request(method, request.url);

			for (name, value) in request.headers {
				builder = builder.header(name, value);
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}
			if let Some(timeout) = request.timeout {
				builder = builder.timeout(timeout);
			}

			let response = builder.send().await.map_err(|e| map_reqwest_error(e, request.timeout))?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let body =
				response.bytes().await.map_err(|e| map_reqwest_error(e, request.timeout))?.to_vec();

			Ok(ApiResponse { status, body, retry_after })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(err: ReqwestError, timeout: Option<StdDuration>) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::Timeout { after: timeout.unwrap_or_default() }.into();
	}

	TransportError::from(err).into()
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return delta.try_into().ok();
		}
	}

	None
}

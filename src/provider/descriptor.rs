//! API descriptor data structures shared by the negotiator, signer, tickler, and pollers.

/// Builder API for assembling API descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::{_prelude::*, auth::ConsumerKey, error::ConfigError};

/// Production web API root.
pub const DEFAULT_BASE_URL: &str = "https://api.ibkr.com/v1/api/";

/// OAuth realm attached to every signed request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Realm {
	/// Production realm for limited power-of-attorney consumers.
	LimitedPoa,
	/// Realm reserved for the provider's `TESTCONS` consumer.
	TestRealm,
	/// Any other realm string.
	Custom(String),
}
impl Realm {
	/// Consumer key the provider pins to [`Realm::TestRealm`].
	pub const TEST_CONSUMER_KEY: &'static str = "TESTCONS";

	/// Picks the realm the provider expects for `consumer_key`.
	pub fn for_consumer(consumer_key: &ConsumerKey) -> Self {
		if consumer_key.as_str() == Self::TEST_CONSUMER_KEY { Self::TestRealm } else { Self::LimitedPoa }
	}

	/// Wire value placed into the `Authorization` header.
	pub fn as_str(&self) -> &str {
		match self {
			Self::LimitedPoa => "limited_poa",
			Self::TestRealm => "test_realm",
			Self::Custom(value) => value,
		}
	}
}
impl Display for Realm {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Resolved endpoint set declared by a descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEndpoints {
	/// `POST` endpoint that performs the Diffie-Hellman exchange.
	pub live_session_token: Url,
	/// `POST` keep-alive endpoint.
	pub tickle: Url,
	/// `POST` endpoint that opens the brokerage session.
	pub brokerage_init: Url,
	/// `POST` endpoint that ends the session.
	pub logout: Url,
	/// `GET` market data snapshot endpoint.
	pub market_snapshot: Url,
}

/// Immutable API descriptor consumed by sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDescriptor {
	/// Root every relative path is joined onto; always ends with `/`.
	pub base_url: Url,
	/// Endpoint definitions.
	pub endpoints: ApiEndpoints,
	/// Explicit realm; derived from the consumer key when absent.
	pub realm: Option<Realm>,
}
impl ApiDescriptor {
	/// Creates a new builder rooted at `base_url`.
	pub fn builder(base_url: Url) -> ApiDescriptorBuilder {
		ApiDescriptorBuilder::new(base_url)
	}

	/// Descriptor for the production web API with default paths.
	pub fn production() -> Result<Self, ConfigError> {
		let base = Url::parse(DEFAULT_BASE_URL)
			.map_err(|source| ConfigError::InvalidUrl { value: DEFAULT_BASE_URL.into(), source })?;

		Ok(Self::builder(base).build()?)
	}

	/// Realm to sign with for `consumer_key`.
	pub fn realm_for(&self, consumer_key: &ConsumerKey) -> Realm {
		self.realm.clone().unwrap_or_else(|| Realm::for_consumer(consumer_key))
	}

	/// Joins a caller-supplied relative path (optionally with a query string) onto the base URL.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		join_path(&self.base_url, path)
	}
}

pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url, ConfigError> {
	base.join(path.trim_start_matches('/'))
		.map_err(|source| ConfigError::InvalidUrl { value: path.to_owned(), source })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn realm_follows_consumer_key() {
		let test = ConsumerKey::new("TESTCONS").unwrap();
		let prod = ConsumerKey::new("ABCDEFGHI").unwrap();

		assert_eq!(Realm::for_consumer(&test).as_str(), "test_realm");
		assert_eq!(Realm::for_consumer(&prod).as_str(), "limited_poa");

		let descriptor = ApiDescriptor::production().expect("Production descriptor should build.");

		assert_eq!(descriptor.realm_for(&test), Realm::TestRealm);
		assert_eq!(
			descriptor.endpoints.live_session_token.as_str(),
			"https://api.ibkr.com/v1/api/oauth/live_session_token"
		);
	}

	#[test]
	fn relative_paths_keep_query_strings() {
		let descriptor = ApiDescriptor::production().unwrap();
		let url = descriptor.endpoint("/iserver/marketdata/snapshot?conids=265598&fields=31").unwrap();

		assert_eq!(url.path(), "/v1/api/iserver/marketdata/snapshot");
		assert_eq!(url.query(), Some("conids=265598&fields=31"));
	}
}

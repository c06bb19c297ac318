// self
use crate::{
	_prelude::*,
	provider::{ApiDescriptor, ApiEndpoints, Realm, descriptor},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum DescriptorError {
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Base URL cannot have paths joined onto it.
	#[error("The base URL cannot be used as a base: {url}.")]
	CannotBeABase {
		/// Offending URL.
		url: String,
	},
	/// A path override could not be joined onto the base URL.
	#[error("The {endpoint} path `{path}` is invalid.")]
	InvalidPath {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Path that failed to join.
		path: String,
	},
	/// Realm strings must be non-empty and printable.
	#[error("Realm must be a non-empty printable string.")]
	InvalidRealm,
}

/// Builder for [`ApiDescriptor`] values.
#[derive(Debug)]
pub struct ApiDescriptorBuilder {
	/// Root URL of the web API.
	pub base_url: Url,
	/// Path of the live session token endpoint.
	pub live_session_token_path: String,
	/// Path of the keep-alive endpoint.
	pub tickle_path: String,
	/// Path of the brokerage session init endpoint.
	pub brokerage_init_path: String,
	/// Path of the logout endpoint.
	pub logout_path: String,
	/// Path of the market data snapshot endpoint.
	pub market_snapshot_path: String,
	/// Explicit realm override.
	pub realm: Option<Realm>,
}
impl ApiDescriptorBuilder {
	/// Creates a new builder seeded with the provider's default paths.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			live_session_token_path: "oauth/live_session_token".into(),
			tickle_path: "tickle".into(),
			brokerage_init_path: "iserver/auth/ssodh/init".into(),
			logout_path: "logout".into(),
			market_snapshot_path: "iserver/marketdata/snapshot".into(),
			realm: None,
		}
	}

	/// Overrides the live session token path.
	pub fn live_session_token_path(mut self, path: impl Into<String>) -> Self {
		self.live_session_token_path = path.into();

		self
	}

	/// Overrides the keep-alive path.
	pub fn tickle_path(mut self, path: impl Into<String>) -> Self {
		self.tickle_path = path.into();

		self
	}

	/// Overrides the brokerage session init path.
	pub fn brokerage_init_path(mut self, path: impl Into<String>) -> Self {
		self.brokerage_init_path = path.into();

		self
	}

	/// Overrides the logout path.
	pub fn logout_path(mut self, path: impl Into<String>) -> Self {
		self.logout_path = path.into();

		self
	}

	/// Overrides the market data snapshot path.
	pub fn market_snapshot_path(mut self, path: impl Into<String>) -> Self {
		self.market_snapshot_path = path.into();

		self
	}

	/// Pins the realm instead of deriving it from the consumer key.
	pub fn realm(mut self, realm: Realm) -> Self {
		self.realm = Some(realm);

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ApiDescriptor, DescriptorError> {
		let mut base_url = self.base_url;

		validate_endpoint("base", &base_url)?;

		if base_url.cannot_be_a_base() {
			return Err(DescriptorError::CannotBeABase { url: base_url.to_string() });
		}
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		let join = |endpoint: &'static str, path: &str| -> Result<Url, DescriptorError> {
			let url = descriptor::join_path(&base_url, path)
				.map_err(|_| DescriptorError::InvalidPath { endpoint, path: path.to_owned() })?;

			validate_endpoint(endpoint, &url)?;

			Ok(url)
		};
		let endpoints = ApiEndpoints {
			live_session_token: join("live_session_token", &self.live_session_token_path)?,
			tickle: join("tickle", &self.tickle_path)?,
			brokerage_init: join("brokerage_init", &self.brokerage_init_path)?,
			logout: join("logout", &self.logout_path)?,
			market_snapshot: join("market_snapshot", &self.market_snapshot_path)?,
		};

		if let Some(Realm::Custom(value)) = &self.realm {
			if value.is_empty() || value.chars().any(|c| c.is_control() || c == '"') {
				return Err(DescriptorError::InvalidRealm);
			}
		}

		Ok(ApiDescriptor { base_url, endpoints, realm: self.realm })
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), DescriptorError> {
	if url.scheme() != "https" {
		Err(DescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn plain_http_is_rejected() {
		let err = ApiDescriptor::builder(Url::parse("http://localhost:5000/v1/api/").unwrap())
			.build()
			.expect_err("HTTP base URLs must be rejected.");

		assert!(matches!(err, DescriptorError::InsecureEndpoint { endpoint: "base", .. }));
	}

	#[test]
	fn missing_trailing_slash_is_normalized() {
		let descriptor = ApiDescriptor::builder(Url::parse("https://gw.example.com/v1/api").unwrap())
			.tickle_path("/custom/tickle")
			.realm(Realm::Custom("paper".into()))
			.build()
			.expect("Descriptor should build.");

		assert_eq!(descriptor.base_url.as_str(), "https://gw.example.com/v1/api/");
		assert_eq!(descriptor.endpoints.tickle.as_str(), "https://gw.example.com/v1/api/custom/tickle");
		assert_eq!(descriptor.endpoints.logout.as_str(), "https://gw.example.com/v1/api/logout");
		assert_eq!(descriptor.realm, Some(Realm::Custom("paper".into())));
	}

	#[test]
	fn absolute_overrides_must_stay_on_https() {
		let err = ApiDescriptor::builder(Url::parse("https://gw.example.com/v1/api/").unwrap())
			.logout_path("http://evil.example.com/logout")
			.build()
			.expect_err("Path overrides must not downgrade to HTTP.");

		assert!(matches!(err, DescriptorError::InsecureEndpoint { endpoint: "logout", .. }));
	}

	#[test]
	fn realm_strings_are_validated() {
		let err = ApiDescriptor::builder(Url::parse("https://gw.example.com/").unwrap())
			.realm(Realm::Custom("bad\"realm".into()))
			.build()
			.expect_err("Quotes would break the header.");

		assert_eq!(err, DescriptorError::InvalidRealm);
	}
}

//! Consumer key material: where it comes from and how it is loaded once at startup.

// std
use std::{fs, path::PathBuf};
// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::RsaPrivateKey;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ConsumerKey},
	crypto::{self, DiffieHellmanAgreement},
	error::{ConfigError, CryptoError},
};

const ENV_CONSUMER_KEY: &str = "IBIND_OAUTH1A_CONSUMER_KEY";
const ENV_ACCESS_TOKEN: &str = "IBIND_OAUTH1A_ACCESS_TOKEN";
const ENV_ACCESS_TOKEN_SECRET: &str = "IBIND_OAUTH1A_ACCESS_TOKEN_SECRET";
const ENV_DH_PRIME: &str = "IBIND_OAUTH1A_DH_PRIME";
const ENV_ENCRYPTION_KEY_FP: &str = "IBIND_OAUTH1A_ENCRYPTION_KEY_FP";
const ENV_SIGNATURE_KEY_FP: &str = "IBIND_OAUTH1A_SIGNATURE_KEY_FP";

/// Location of a single piece of key material.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
	/// Value supplied directly (PEM text, hex, or base64 depending on the field).
	Inline(String),
	/// Value read from a file; surrounding whitespace is trimmed.
	File(PathBuf),
	/// Value read from the named environment variable at load time.
	Env(String),
}
impl KeySource {
	/// Shorthand for [`KeySource::Inline`].
	pub fn inline(value: impl Into<String>) -> Self {
		Self::Inline(value.into())
	}

	/// Shorthand for [`KeySource::File`].
	pub fn file(path: impl Into<PathBuf>) -> Self {
		Self::File(path.into())
	}

	fn resolve(&self, field: &'static str) -> Result<String, ConfigError> {
		let raw = match self {
			Self::Inline(value) => value.clone(),
			Self::File(path) => fs::read_to_string(path).map_err(|source| ConfigError::KeyFile {
				field,
				path: path.display().to_string(),
				source,
			})?,
			Self::Env(var) =>
				std::env::var(var).map_err(|_| ConfigError::MissingEnv { var: var.clone() })?,
		};
		let trimmed = raw.trim();

		if trimmed.is_empty() {
			return Err(ConfigError::MissingKeyField { field });
		}

		Ok(trimmed.to_owned())
	}
}
impl Debug for KeySource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Inline(_) => f.debug_tuple("Inline").field(&"<redacted>").finish(),
			Self::File(path) => f.debug_tuple("File").field(path).finish(),
			Self::Env(var) => f.debug_tuple("Env").field(var).finish(),
		}
	}
}

/// Sources for every field of [`KeyMaterial`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct KeyMaterialConfig {
	/// OAuth consumer key.
	pub consumer_key: KeySource,
	/// OAuth access token.
	pub access_token: KeySource,
	/// Base64 RSA ciphertext of the access token secret.
	pub access_token_secret: KeySource,
	/// Hex-encoded Diffie-Hellman prime.
	pub dh_prime: KeySource,
	/// PEM private key that decrypts the access token secret.
	pub encryption_key: KeySource,
	/// PEM private key that signs the live session token request.
	pub signature_key: KeySource,
}
impl KeyMaterialConfig {
	/// Reads the `IBIND_OAUTH1A_*` variables from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_env_with(|name| std::env::var(name).ok())
	}

	/// Same as [`KeyMaterialConfig::from_env`] with a custom variable lookup.
	///
	/// Each inline variable has a `*_FILE` counterpart that is consulted only when the variable
	/// itself is unset or blank. The RSA keys are always referenced by path.
	pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let value_or_file = |var: &'static str| -> Result<KeySource, ConfigError> {
			if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
				return Ok(KeySource::Inline(value.trim().to_owned()));
			}

			let file_var = format!("{var}_FILE");

			match lookup(&file_var).filter(|v| !v.trim().is_empty()) {
				Some(path) => Ok(KeySource::File(PathBuf::from(path.trim()))),
				None => Err(ConfigError::MissingEnv { var: var.to_owned() }),
			}
		};
		let path = |var: &'static str| -> Result<KeySource, ConfigError> {
			lookup(var)
				.filter(|v| !v.trim().is_empty())
				.map(|v| KeySource::File(PathBuf::from(v.trim())))
				.ok_or_else(|| ConfigError::MissingEnv { var: var.to_owned() })
		};

		Ok(Self {
			consumer_key: value_or_file(ENV_CONSUMER_KEY)?,
			access_token: value_or_file(ENV_ACCESS_TOKEN)?,
			access_token_secret: value_or_file(ENV_ACCESS_TOKEN_SECRET)?,
			dh_prime: value_or_file(ENV_DH_PRIME)?,
			encryption_key: path(ENV_ENCRYPTION_KEY_FP)?,
			signature_key: path(ENV_SIGNATURE_KEY_FP)?,
		})
	}
}

/// Fully parsed, immutable consumer credentials.
///
/// Every field is validated at load time so a broken deployment fails before the first network
/// call. Nothing in here is serializable and `Debug` redacts the secrets.
#[derive(Clone)]
pub struct KeyMaterial {
	consumer_key: ConsumerKey,
	access_token: AccessToken,
	encrypted_access_token_secret: Vec<u8>,
	dh: DiffieHellmanAgreement,
	encryption_key: RsaPrivateKey,
	signature_key: RsaPrivateKey,
}
impl KeyMaterial {
	/// Resolves and parses every source in `config`.
	pub fn load(config: &KeyMaterialConfig) -> Result<Self> {
		let consumer_key = ConsumerKey::new(config.consumer_key.resolve("consumer_key")?)
			.map_err(ConfigError::from)?;
		let access_token = AccessToken::new(config.access_token.resolve("access_token")?)
			.map_err(ConfigError::from)?;
		let secret = config.access_token_secret.resolve("access_token_secret")?;
		let encrypted_access_token_secret = STANDARD
			.decode(secret.as_bytes())
			.map_err(|source| CryptoError::InvalidBase64 { field: "access_token_secret", source })?;
		let dh = DiffieHellmanAgreement::from_hex(&config.dh_prime.resolve("dh_prime")?)?;
		let encryption_key = crypto::parse_rsa_private_key(
			"encryption_key",
			&config.encryption_key.resolve("encryption_key")?,
		)?;
		let signature_key = crypto::parse_rsa_private_key(
			"signature_key",
			&config.signature_key.resolve("signature_key")?,
		)?;

		Ok(Self {
			consumer_key,
			access_token,
			encrypted_access_token_secret,
			dh,
			encryption_key,
			signature_key,
		})
	}

	/// Assembles key material from already-parsed parts.
	pub fn from_parts(
		consumer_key: ConsumerKey,
		access_token: AccessToken,
		encrypted_access_token_secret: Vec<u8>,
		dh: DiffieHellmanAgreement,
		encryption_key: RsaPrivateKey,
		signature_key: RsaPrivateKey,
	) -> Self {
		Self {
			consumer_key,
			access_token,
			encrypted_access_token_secret,
			dh,
			encryption_key,
			signature_key,
		}
	}

	/// OAuth consumer key.
	pub fn consumer_key(&self) -> &ConsumerKey {
		&self.consumer_key
	}

	/// OAuth access token.
	pub fn access_token(&self) -> &AccessToken {
		&self.access_token
	}

	/// RSA ciphertext of the access token secret.
	pub fn encrypted_access_token_secret(&self) -> &[u8] {
		&self.encrypted_access_token_secret
	}

	/// Diffie-Hellman group issued with the consumer key.
	pub fn dh(&self) -> &DiffieHellmanAgreement {
		&self.dh
	}

	/// Key that decrypts the access token secret.
	pub fn encryption_key(&self) -> &RsaPrivateKey {
		&self.encryption_key
	}

	/// Key that signs the live session token request.
	pub fn signature_key(&self) -> &RsaPrivateKey {
		&self.signature_key
	}
}
impl Debug for KeyMaterial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeyMaterial")
			.field("consumer_key", &self.consumer_key)
			.field("access_token", &self.access_token)
			.field("encrypted_access_token_secret", &"<redacted>")
			.field("dh", &self.dh)
			.field("encryption_key", &"<redacted>")
			.field("signature_key", &"<redacted>")
			.finish()
	}
}

//! Cryptographic building blocks for the live session token exchange.
//!
//! [`SecretDecryptor`] recovers the access token secret, [`DiffieHellmanAgreement`] performs the
//! ephemeral key agreement, and the free functions below wrap the HMAC and RSA primitives the
//! OAuth 1.0a flavour of the provider relies on.

pub mod decrypt;
pub mod dh;

pub use decrypt::*;
pub use dh::*;

// crates.io
use hmac::{Hmac, Mac};
use rsa::{
	RsaPrivateKey,
	pkcs1::DecodeRsaPrivateKey,
	pkcs1v15::SigningKey,
	pkcs8::DecodePrivateKey,
	signature::{SignatureEncoding, Signer},
};
use sha1::Sha1;
use sha2::Sha256;
// self
use crate::error::CryptoError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Computes `HMAC-SHA1(key, message)`.
pub fn hmac_sha1(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
	let mut mac = <HmacSha1 as Mac>::new_from_slice(key)?;

	mac.update(message);

	Ok(mac.finalize().into_bytes().to_vec())
}

/// Computes `HMAC-SHA256(key, message)`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
	let mut mac = <HmacSha256 as Mac>::new_from_slice(key)?;

	mac.update(message);

	Ok(mac.finalize().into_bytes().to_vec())
}

/// Checks `HMAC-SHA1(key, message) == expected` in constant time.
pub fn verify_hmac_sha1(key: &[u8], message: &[u8], expected: &[u8]) -> Result<bool, CryptoError> {
	let mut mac = <HmacSha1 as Mac>::new_from_slice(key)?;

	mac.update(message);

	Ok(mac.verify_slice(expected).is_ok())
}

/// Produces a PKCS#1 v1.5 RSA-SHA256 signature over `message`.
pub fn sign_rsa_sha256(key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
	let signing_key = SigningKey::<Sha256>::new(key.clone());
	let signature = signing_key
		.try_sign(message)
		.map_err(|e| CryptoError::Sign { message: e.to_string() })?;

	Ok(signature.to_vec())
}

/// Parses a PEM-encoded RSA private key in either PKCS#8 or PKCS#1 form.
pub fn parse_rsa_private_key(field: &'static str, pem: &str) -> Result<RsaPrivateKey, CryptoError> {
	let pem = pem.trim();

	match RsaPrivateKey::from_pkcs8_pem(pem) {
		Ok(key) => Ok(key),
		Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
			CryptoError::InvalidPrivateKey {
				field,
				message: format!("not PKCS#8 ({pkcs8_err}) nor PKCS#1 ({pkcs1_err})"),
			}
		}),
	}
}

//! RSA recovery of the access token secret issued by the provider.

// crates.io
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
// self
use crate::{auth::SecretBytes, error::CryptoError};

/// Decrypts the access token secret with the consumer's encryption key.
///
/// The provider encrypts the secret with PKCS#1 v1.5 padding. Padding failures surface as
/// [`CryptoError::Decrypt`]; garbage bytes are never returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecretDecryptor;
impl SecretDecryptor {
	/// Recovers the raw secret bytes from `ciphertext`.
	pub fn decrypt(ciphertext: &[u8], key: &RsaPrivateKey) -> Result<SecretBytes, CryptoError> {
		let plaintext = key
			.decrypt(Pkcs1v15Encrypt, ciphertext)
			.map_err(|source| CryptoError::Decrypt { source })?;

		if plaintext.is_empty() {
			return Err(CryptoError::Decrypt { source: rsa::Error::Decryption });
		}

		Ok(SecretBytes::new(plaintext))
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use rsa::rand_core::OsRng;
	// self
	use super::*;
	use crate::crypto;

	fn key() -> RsaPrivateKey {
		crypto::parse_rsa_private_key(
			"encryption_key",
			include_str!("../../tests/fixtures/encryption_key.pem"),
		)
		.expect("Encryption key fixture should parse.")
	}

	#[test]
	fn decrypts_what_the_public_key_encrypted() {
		let key = key();
		let ciphertext = key
			.to_public_key()
			.encrypt(&mut OsRng, Pkcs1v15Encrypt, b"access-token-secret")
			.expect("Encryption should succeed.");
		let secret = SecretDecryptor::decrypt(&ciphertext, &key).expect("Decryption should work.");

		assert_eq!(secret.expose(), b"access-token-secret");
	}

	#[test]
	fn corrupted_ciphertext_is_rejected() {
		let key = key();
		let mut ciphertext = key
			.to_public_key()
			.encrypt(&mut OsRng, Pkcs1v15Encrypt, b"access-token-secret")
			.expect("Encryption should succeed.");

		ciphertext[17] ^= 0x01;

		let err = SecretDecryptor::decrypt(&ciphertext, &key)
			.expect_err("Flipped ciphertext must not decrypt.");

		assert!(matches!(err, CryptoError::Decrypt { .. }));
	}

	#[test]
	fn truncated_ciphertext_is_rejected() {
		let key = key();

		assert!(matches!(
			SecretDecryptor::decrypt(&[0x42; 16], &key),
			Err(CryptoError::Decrypt { .. })
		));
	}
}

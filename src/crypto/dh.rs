//! Ephemeral Diffie-Hellman agreement over the provider-issued prime with generator `g = 2`.

// crates.io
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;
// self
use crate::{_prelude::*, auth::SecretBytes, error::CryptoError};

/// Fixed generator mandated by the provider.
pub const GENERATOR: u32 = 2;

/// Diffie-Hellman group parameters (prime modulus) shared with the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct DiffieHellmanAgreement {
	prime: BigUint,
}
impl DiffieHellmanAgreement {
	/// Validates and wraps a prime modulus.
	pub fn new(prime: BigUint) -> Result<Self, CryptoError> {
		if prime < BigUint::from(5_u32) {
			return Err(CryptoError::InvalidPrime { reason: "prime must be at least 5" });
		}
		if !prime.bit(0) {
			return Err(CryptoError::InvalidPrime { reason: "prime must be odd" });
		}

		Ok(Self { prime })
	}

	/// Parses a hex-encoded prime (an optional `0x` prefix and surrounding whitespace are
	/// accepted).
	pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
		let trimmed = value.trim();
		let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
		let bytes = if digits.len() % 2 == 1 {
			hex::decode(format!("0{digits}"))
		} else {
			hex::decode(digits)
		}
		.map_err(|source| CryptoError::InvalidHex { field: "dh_prime", source })?;

		Self::new(BigUint::from_bytes_be(&bytes))
	}

	/// Prime modulus.
	pub fn prime(&self) -> &BigUint {
		&self.prime
	}

	/// Generates a fresh ephemeral state from the thread-local CSPRNG.
	pub fn generate(&self) -> DiffieHellmanState {
		self.generate_with(&mut rand::rng())
	}

	/// Generates a fresh ephemeral state from the supplied CSPRNG.
	///
	/// The exponent is drawn from as many random bytes as the prime occupies and reduced into
	/// `[2, p - 2]`, so it is never materially shorter than the modulus.
	pub fn generate_with<R>(&self, rng: &mut R) -> DiffieHellmanState
	where
		R: ?Sized + CryptoRng + RngCore,
	{
		let width = self.prime.to_bytes_be().len();
		let mut buf = Zeroizing::new(vec![0_u8; width]);

		rng.fill_bytes(&mut buf);

		let span = &self.prime - BigUint::from(3_u32);
		let exponent = BigUint::from_bytes_be(&buf) % span + BigUint::from(2_u32);

		self.state_from_exponent(exponent)
	}

	/// Builds a state from a caller-chosen exponent for deterministic vectors.
	#[cfg(test)]
	pub(crate) fn with_exponent(&self, exponent: BigUint) -> Result<DiffieHellmanState, CryptoError> {
		let upper = &self.prime - BigUint::from(2_u32);

		if exponent < BigUint::from(2_u32) || exponent > upper {
			return Err(CryptoError::DhParameter { reason: "private exponent out of range" });
		}

		Ok(self.state_from_exponent(exponent))
	}

	/// Computes `server_public ^ a mod p`, consuming the ephemeral state.
	///
	/// The result is big-endian with a leading zero byte whenever the most significant bit is
	/// set, matching the provider's signed integer encoding.
	pub fn derive_shared(
		&self,
		state: DiffieHellmanState,
		server_public: &BigUint,
	) -> Result<SecretBytes, CryptoError> {
		let upper = &self.prime - BigUint::from(1_u32);

		if *server_public < BigUint::from(2_u32) || *server_public > upper {
			return Err(CryptoError::DhParameter { reason: "server public value outside [2, p-1]" });
		}

		let exponent = BigUint::from_bytes_be(&state.private_exponent);
		let shared = server_public.modpow(&exponent, &self.prime);

		Ok(SecretBytes::new(signed_be_bytes(&shared)))
	}

	fn state_from_exponent(&self, exponent: BigUint) -> DiffieHellmanState {
		let public_challenge = BigUint::from(GENERATOR).modpow(&exponent, &self.prime);

		DiffieHellmanState {
			private_exponent: Zeroizing::new(exponent.to_bytes_be()),
			public_challenge,
		}
	}
}
impl Debug for DiffieHellmanAgreement {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DiffieHellmanAgreement").field("prime_bits", &self.prime.bits()).finish()
	}
}

/// Single-use ephemeral key pair for one negotiation.
///
/// Consumed by [`DiffieHellmanAgreement::derive_shared`]; the exponent bytes are wiped on drop.
pub struct DiffieHellmanState {
	private_exponent: Zeroizing<Vec<u8>>,
	public_challenge: BigUint,
}
impl DiffieHellmanState {
	/// Public challenge `g ^ a mod p`.
	pub fn public_challenge(&self) -> &BigUint {
		&self.public_challenge
	}

	/// Lowercase hex rendering of the challenge, as sent in `diffie_hellman_challenge`.
	pub fn challenge_hex(&self) -> String {
		self.public_challenge.to_str_radix(16)
	}
}
impl Debug for DiffieHellmanState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DiffieHellmanState")
			.field("private_exponent", &"<redacted>")
			.field("public_challenge", &self.challenge_hex())
			.finish()
	}
}

/// Parses a hex-encoded public value received from the provider.
pub fn parse_public_value(field: &'static str, value: &str) -> Result<BigUint, CryptoError> {
	let trimmed = value.trim();
	let bytes = if trimmed.len() % 2 == 1 {
		hex::decode(format!("0{trimmed}"))
	} else {
		hex::decode(trimmed)
	}
	.map_err(|source| CryptoError::InvalidHex { field, source })?;

	Ok(BigUint::from_bytes_be(&bytes))
}

fn signed_be_bytes(value: &BigUint) -> Vec<u8> {
	let mut bytes = value.to_bytes_be();

	if value.bits() % 8 == 0 {
		bytes.insert(0, 0);
	}

	bytes
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn small_group() -> DiffieHellmanAgreement {
		DiffieHellmanAgreement::new(BigUint::from(23_u32)).expect("23 is a valid toy prime.")
	}

	#[test]
	fn toy_group_vectors() {
		let group = small_group();
		let alice = group.with_exponent(BigUint::from(6_u32)).unwrap();
		let bob = group.with_exponent(BigUint::from(15_u32)).unwrap();

		assert_eq!(alice.public_challenge(), &BigUint::from(18_u32));
		// 2 has order 11 modulo 23, so 2^15 = 2^4.
		assert_eq!(bob.public_challenge(), &BigUint::from(16_u32));

		let alice_public = alice.public_challenge().clone();
		let bob_public = bob.public_challenge().clone();
		let from_alice = group.derive_shared(alice, &bob_public).unwrap();
		let from_bob = group.derive_shared(bob, &alice_public).unwrap();

		assert_eq!(from_alice.expose(), &[4]);
		assert_eq!(from_alice, from_bob);
	}

	#[test]
	fn agreement_is_symmetric_for_random_states() {
		let group = DiffieHellmanAgreement::from_hex(include_str!("../../tests/fixtures/dh_prime.hex"))
			.expect("Fixture prime should parse.");

		for _ in 0..4 {
			let a = group.generate();
			let b = group.generate();
			let a_public = a.public_challenge().clone();
			let b_public = b.public_challenge().clone();

			assert_eq!(
				group.derive_shared(a, &b_public).unwrap(),
				group.derive_shared(b, &a_public).unwrap()
			);
		}
	}

	#[test]
	fn exponent_width_tracks_prime_width() {
		let group = DiffieHellmanAgreement::from_hex(include_str!("../../tests/fixtures/dh_prime.hex"))
			.unwrap();
		let state = group.generate();

		assert!(state.private_exponent.len() * 8 >= group.prime().bits() as usize - 64);
		assert!(state.public_challenge() < group.prime());
	}

	#[test]
	fn server_values_outside_range_are_rejected() {
		let group = small_group();

		for bad in [0_u32, 1, 23, 99] {
			let state = group.with_exponent(BigUint::from(6_u32)).unwrap();
			let err = group
				.derive_shared(state, &BigUint::from(bad))
				.expect_err("Out of range public values must be rejected.");

			assert!(matches!(err, CryptoError::DhParameter { .. }));
		}

		let state = group.with_exponent(BigUint::from(6_u32)).unwrap();

		group.derive_shared(state, &BigUint::from(22_u32)).expect("p - 1 is inside the range.");
	}

	#[test]
	fn invalid_primes_are_rejected() {
		assert!(DiffieHellmanAgreement::new(BigUint::from(4_u32)).is_err());
		assert!(DiffieHellmanAgreement::new(BigUint::from(24_u32)).is_err());
		assert!(DiffieHellmanAgreement::from_hex("zz").is_err());
		assert!(DiffieHellmanAgreement::from_hex("0x17").is_ok());
	}

	#[test]
	fn signed_encoding_prefixes_high_bit() {
		assert_eq!(signed_be_bytes(&BigUint::from(0x7f_u32)), vec![0x7f]);
		assert_eq!(signed_be_bytes(&BigUint::from(0x80_u32)), vec![0x00, 0x80]);
		assert_eq!(signed_be_bytes(&BigUint::from(0x0100_u32)), vec![0x01, 0x00]);
	}

	#[test]
	fn public_values_parse_odd_length_hex() {
		assert_eq!(parse_public_value("dh", "abc").unwrap(), BigUint::from(0xabc_u32));
		assert!(parse_public_value("dh", "xyz").is_err());
	}
}

//! Pluggable crypto capability.
//!
//! The engine consumes a [`CryptoProvider`] and never branches on where the
//! keys live; a hardware wallet supplies the same capability set, with the
//! primary private spend key held as the null sentinel on the host. The
//! default [`SoftwareCrypto`] implements the CryptoNote one-time key protocol
//! over Ristretto with Keccak hashing.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256, Keccak512};

use crate::error::CryptoError;
use crate::primitives::{Hash256, KeyDerivation, KeyImage, PublicKey, SecretKey, Signature};

/// The capability set the wallet requires from a crypto backend.
///
/// Any of these may be replaced by a caller-supplied implementation, e.g. one
/// that defers signing operations to a hardware device.
pub trait CryptoProvider: Send + Sync {
    /// Generates a fresh random key pair.
    fn generate_key_pair(&self) -> (PublicKey, SecretKey);

    /// Derives the public key for a secret key.
    fn secret_key_to_public_key(&self, secret_key: &SecretKey) -> Result<PublicKey, CryptoError>;

    /// Computes the ECDH shared secret `a * R` between a transaction public
    /// key and the private view key.
    fn generate_key_derivation(
        &self,
        tx_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError>;

    /// Derives the one-time output public key `Hs(D || i) * G + B`.
    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_spend_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError>;

    /// Derives the one-time output secret key `Hs(D || i) + b`.
    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_spend_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError>;

    /// Recovers the recipient's public spend key `K - Hs(D || i) * G` from an
    /// output key. The inverse of [`CryptoProvider::derive_public_key`].
    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError>;

    /// Computes the spend nullifier `p * Hp(P)` for a one-time key pair.
    fn generate_key_image(
        &self,
        public_ephemeral: &PublicKey,
        private_ephemeral: &SecretKey,
    ) -> Result<KeyImage, CryptoError>;

    /// Keccak-256, the protocol's universal hash.
    fn cn_fast_hash(&self, data: &[u8]) -> Hash256;

    /// Produces ring signatures proving ownership of `input_keys[real_index]`
    /// without revealing which member is real.
    fn generate_ring_signatures(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        input_keys: &[PublicKey],
        private_ephemeral: &SecretKey,
        real_index: usize,
    ) -> Result<Vec<Signature>, CryptoError>;

    /// Verifies ring signatures produced by
    /// [`CryptoProvider::generate_ring_signatures`].
    fn check_ring_signatures(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        input_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;
}

/// Software implementation of the crypto capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCrypto;

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn keccak512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Keccak512::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&digest);
    wide
}

fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256(data))
}

/// Maps arbitrary bytes to a point with unknown discrete log, used for key
/// image bases.
fn hash_to_point(data: &[u8]) -> RistrettoPoint {
    RistrettoPoint::from_uniform_bytes(&keccak512(data))
}

fn decompress(key: &PublicKey) -> Result<RistrettoPoint, CryptoError> {
    CompressedRistretto(key.0)
        .decompress()
        .ok_or(CryptoError::InvalidPublicKey(*key))
}

fn scalar(secret: &SecretKey) -> Scalar {
    Scalar::from_bytes_mod_order(secret.0)
}

fn write_varint(buffer: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buffer.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// `Hs(D || varint(i))`, the per-output tweak scalar.
fn derivation_to_scalar(derivation: &KeyDerivation, output_index: u64) -> Scalar {
    let mut buffer = Vec::with_capacity(32 + 10);
    buffer.extend_from_slice(&derivation.0);
    write_varint(&mut buffer, output_index);
    hash_to_scalar(&buffer)
}

impl CryptoProvider for SoftwareCrypto {
    fn generate_key_pair(&self) -> (PublicKey, SecretKey) {
        let secret = Scalar::random(&mut OsRng);
        let public = RistrettoPoint::mul_base(&secret);
        (
            PublicKey(public.compress().to_bytes()),
            SecretKey(secret.to_bytes()),
        )
    }

    fn secret_key_to_public_key(&self, secret_key: &SecretKey) -> Result<PublicKey, CryptoError> {
        if secret_key.is_null() {
            return Err(CryptoError::MissingSecretKey);
        }
        let public = RistrettoPoint::mul_base(&scalar(secret_key));
        Ok(PublicKey(public.compress().to_bytes()))
    }

    fn generate_key_derivation(
        &self,
        tx_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError> {
        let point = decompress(tx_public_key)?;
        let shared = scalar(private_view_key) * point;
        Ok(KeyDerivation(shared.compress().to_bytes()))
    }

    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_spend_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        let base = decompress(public_spend_key)?;
        let tweak = derivation_to_scalar(derivation, output_index);
        let derived = base + RistrettoPoint::mul_base(&tweak);
        Ok(PublicKey(derived.compress().to_bytes()))
    }

    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_spend_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError> {
        if private_spend_key.is_null() {
            return Err(CryptoError::MissingSecretKey);
        }
        let tweak = derivation_to_scalar(derivation, output_index);
        let derived = tweak + scalar(private_spend_key);
        Ok(SecretKey(derived.to_bytes()))
    }

    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        let key = decompress(output_key)?;
        let tweak = derivation_to_scalar(derivation, output_index);
        let underived = key - RistrettoPoint::mul_base(&tweak);
        Ok(PublicKey(underived.compress().to_bytes()))
    }

    fn generate_key_image(
        &self,
        public_ephemeral: &PublicKey,
        private_ephemeral: &SecretKey,
    ) -> Result<KeyImage, CryptoError> {
        if private_ephemeral.is_null() {
            return Err(CryptoError::MissingSecretKey);
        }
        let base = hash_to_point(&public_ephemeral.0);
        let image = scalar(private_ephemeral) * base;
        Ok(KeyImage(image.compress().to_bytes()))
    }

    fn cn_fast_hash(&self, data: &[u8]) -> Hash256 {
        Hash256(keccak256(data))
    }

    fn generate_ring_signatures(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        input_keys: &[PublicKey],
        private_ephemeral: &SecretKey,
        real_index: usize,
    ) -> Result<Vec<Signature>, CryptoError> {
        if real_index >= input_keys.len() {
            return Err(CryptoError::InvalidRealIndex {
                index: real_index,
                ring_size: input_keys.len(),
            });
        }
        if private_ephemeral.is_null() {
            return Err(CryptoError::MissingSecretKey);
        }
        let image = CompressedRistretto(key_image.0)
            .decompress()
            .ok_or(CryptoError::InvalidKeyImage)?;
        let secret = scalar(private_ephemeral);

        let mut signatures = vec![Signature::default(); input_keys.len()];
        let mut challenge_sum = Scalar::ZERO;
        let mut nonce = Scalar::ZERO;
        let mut transcript = Vec::with_capacity(32 + input_keys.len() * 64);
        transcript.extend_from_slice(&prefix_hash.0);

        for (index, member) in input_keys.iter().enumerate() {
            let member_point = decompress(member)?;
            let member_base = hash_to_point(&member.0);
            let (commitment_g, commitment_h) = if index == real_index {
                nonce = Scalar::random(&mut OsRng);
                (RistrettoPoint::mul_base(&nonce), nonce * member_base)
            } else {
                let challenge = Scalar::random(&mut OsRng);
                let response = Scalar::random(&mut OsRng);
                signatures[index] = Signature {
                    c: challenge.to_bytes(),
                    r: response.to_bytes(),
                };
                challenge_sum += challenge;
                (
                    RistrettoPoint::mul_base(&response) + challenge * member_point,
                    response * member_base + challenge * image,
                )
            };
            transcript.extend_from_slice(commitment_g.compress().as_bytes());
            transcript.extend_from_slice(commitment_h.compress().as_bytes());
        }

        let total = hash_to_scalar(&transcript);
        let real_challenge = total - challenge_sum;
        let real_response = nonce - real_challenge * secret;
        signatures[real_index] = Signature {
            c: real_challenge.to_bytes(),
            r: real_response.to_bytes(),
        };

        Ok(signatures)
    }

    fn check_ring_signatures(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        input_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        if input_keys.is_empty() || input_keys.len() != signatures.len() {
            return false;
        }
        let Some(image) = CompressedRistretto(key_image.0).decompress() else {
            return false;
        };

        let mut challenge_sum = Scalar::ZERO;
        let mut transcript = Vec::with_capacity(32 + input_keys.len() * 64);
        transcript.extend_from_slice(&prefix_hash.0);

        for (member, signature) in input_keys.iter().zip(signatures) {
            let Some(member_point) = CompressedRistretto(member.0).decompress() else {
                return false;
            };
            let member_base = hash_to_point(&member.0);
            let challenge = Scalar::from_bytes_mod_order(signature.c);
            let response = Scalar::from_bytes_mod_order(signature.r);
            let commitment_g = RistrettoPoint::mul_base(&response) + challenge * member_point;
            let commitment_h = response * member_base + challenge * image;
            transcript.extend_from_slice(commitment_g.compress().as_bytes());
            transcript.extend_from_slice(commitment_h.compress().as_bytes());
            challenge_sum += challenge;
        }

        hash_to_scalar(&transcript) == challenge_sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> SoftwareCrypto {
        SoftwareCrypto
    }

    #[test]
    fn underive_recovers_spend_key() {
        let crypto = crypto();
        let (spend_public, _) = crypto.generate_key_pair();
        let (view_public, view_secret) = crypto.generate_key_pair();
        let (tx_public, tx_secret) = crypto.generate_key_pair();

        // The sender derives against the recipient's view key, the recipient
        // against the transaction key. Both sides must agree.
        let sender_side = crypto
            .generate_key_derivation(&view_public, &tx_secret)
            .unwrap();
        let receiver_side = crypto
            .generate_key_derivation(&tx_public, &view_secret)
            .unwrap();
        assert_eq!(sender_side, receiver_side);

        let output_key = crypto
            .derive_public_key(&sender_side, 3, &spend_public)
            .unwrap();
        let underived = crypto
            .underive_public_key(&receiver_side, 3, &output_key)
            .unwrap();
        assert_eq!(underived, spend_public);

        // Wrong index fails to recover the spend key.
        let wrong = crypto
            .underive_public_key(&receiver_side, 4, &output_key)
            .unwrap();
        assert_ne!(wrong, spend_public);
    }

    #[test]
    fn derived_secret_matches_derived_public() {
        let crypto = crypto();
        let (spend_public, spend_secret) = crypto.generate_key_pair();
        let (_, view_secret) = crypto.generate_key_pair();
        let (tx_public, _) = crypto.generate_key_pair();

        let derivation = crypto
            .generate_key_derivation(&tx_public, &view_secret)
            .unwrap();
        let public_ephemeral = crypto
            .derive_public_key(&derivation, 0, &spend_public)
            .unwrap();
        let private_ephemeral = crypto
            .derive_secret_key(&derivation, 0, &spend_secret)
            .unwrap();
        assert_eq!(
            crypto.secret_key_to_public_key(&private_ephemeral).unwrap(),
            public_ephemeral
        );
    }

    #[test]
    fn key_image_is_deterministic_and_key_bound() {
        let crypto = crypto();
        let (public_a, secret_a) = crypto.generate_key_pair();
        let (public_b, secret_b) = crypto.generate_key_pair();

        let image_a = crypto.generate_key_image(&public_a, &secret_a).unwrap();
        assert_eq!(
            image_a,
            crypto.generate_key_image(&public_a, &secret_a).unwrap()
        );
        assert_ne!(
            image_a,
            crypto.generate_key_image(&public_b, &secret_b).unwrap()
        );
    }

    #[test]
    fn null_secret_is_rejected() {
        let crypto = crypto();
        let (public, _) = crypto.generate_key_pair();
        assert!(matches!(
            crypto.generate_key_image(&public, &SecretKey::NULL),
            Err(CryptoError::MissingSecretKey)
        ));
        assert!(matches!(
            crypto.secret_key_to_public_key(&SecretKey::NULL),
            Err(CryptoError::MissingSecretKey)
        ));
    }

    #[test]
    fn ring_signatures_verify() {
        let crypto = crypto();
        let prefix = crypto.cn_fast_hash(b"prefix");

        let mut ring = Vec::new();
        for _ in 0..3 {
            ring.push(crypto.generate_key_pair().0);
        }
        let (real_public, real_secret) = crypto.generate_key_pair();
        ring.push(real_public);
        let key_image = crypto
            .generate_key_image(&real_public, &real_secret)
            .unwrap();

        let signatures = crypto
            .generate_ring_signatures(&prefix, &key_image, &ring, &real_secret, 3)
            .unwrap();
        assert!(crypto.check_ring_signatures(&prefix, &key_image, &ring, &signatures));

        // Tampering with any part breaks verification.
        let other_prefix = crypto.cn_fast_hash(b"other");
        assert!(!crypto.check_ring_signatures(&other_prefix, &key_image, &ring, &signatures));
        let mut tampered = signatures.clone();
        tampered[1].r[0] ^= 1;
        assert!(!crypto.check_ring_signatures(&prefix, &key_image, &ring, &tampered));
    }

    #[test]
    fn ring_signature_index_out_of_range() {
        let crypto = crypto();
        let prefix = crypto.cn_fast_hash(b"prefix");
        let (public, secret) = crypto.generate_key_pair();
        let key_image = crypto.generate_key_image(&public, &secret).unwrap();
        assert!(matches!(
            crypto.generate_ring_signatures(&prefix, &key_image, &[public], &secret, 1),
            Err(CryptoError::InvalidRealIndex { .. })
        ));
    }
}

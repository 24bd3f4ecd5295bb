//! Cryptographic primitives: extended public keys, signing, and the
//! authenticated-encryption envelope every wire packet is sealed with.
//!
//! Every chat and peer identity is an "extended public key" (EPK): the
//! concatenation of a curve25519 encryption key and an ed25519 signature key.
//! This module is the crate's only place that touches
//! `ed25519-dalek`/`x25519-dalek`/`chacha20poly1305` directly — everything
//! above it (certificates, peers, announce packets) works in terms of `Epk`
//! and the `encrypt`/`decrypt`/`sign`/`verify` functions below.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XStaticSecret};
use zeroize::Zeroize;

use crate::error::{Error, Result};

pub const ENC_KEY_SIZE: usize = 32;
pub const SIG_KEY_SIZE: usize = 32;
pub const EPK_SIZE: usize = ENC_KEY_SIZE + SIG_KEY_SIZE;
pub const SIGNATURE_SIZE: usize = 64;
pub const NONCE_SIZE: usize = 24;
pub const MAC_SIZE: usize = 16;

const SESSION_KEY_INFO: &[u8] = b"groupwire-envelope-v1";

/// A 64-byte extended public key: `{ENC: 32 || SIG: 32}`.
///
/// Equality and hashing use the full 64-byte value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Epk([u8; EPK_SIZE]);

impl Epk {
    pub fn from_parts(enc: [u8; ENC_KEY_SIZE], sig: [u8; SIG_KEY_SIZE]) -> Self {
        let mut bytes = [0u8; EPK_SIZE];
        bytes[..ENC_KEY_SIZE].copy_from_slice(&enc);
        bytes[ENC_KEY_SIZE..].copy_from_slice(&sig);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; EPK_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; EPK_SIZE] {
        &self.0
    }

    pub fn enc(&self) -> [u8; ENC_KEY_SIZE] {
        self.0[..ENC_KEY_SIZE].try_into().unwrap()
    }

    pub fn sig(&self) -> [u8; SIG_KEY_SIZE] {
        self.0[ENC_KEY_SIZE..].try_into().unwrap()
    }

    /// XOR distance between the ENC halves of two EPKs (close-set / DHT
    /// ordering metric).
    pub fn xor_distance(&self, other: &Epk) -> [u8; ENC_KEY_SIZE] {
        let mut out = [0u8; ENC_KEY_SIZE];
        let a = self.enc();
        let b = other.enc();
        for i in 0..ENC_KEY_SIZE {
            out[i] = a[i] ^ b[i];
        }
        out
    }

    /// True if `self` is strictly closer to `target` than `other` is
    /// (XOR-distance order).
    pub fn closer_than(&self, target: &Epk, other: &Epk) -> bool {
        self.xor_distance(target) < other.xor_distance(target)
    }
}

impl std::fmt::Debug for Epk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Epk({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Epk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A full keypair: a curve25519 key for encryption and an ed25519 key for
/// signing, generated together. Zeroizes its secret halves on drop.
pub struct ExtendedKeypair {
    enc_secret: XStaticSecret,
    enc_public: XPublicKey,
    sig_signing: SigningKey,
    sig_verifying: VerifyingKey,
}

impl ExtendedKeypair {
    pub fn generate() -> Self {
        let mut csprng = rand::rng();
        let enc_secret = XStaticSecret::random_from_rng(&mut csprng);
        let enc_public = XPublicKey::from(&enc_secret);
        let sig_signing = SigningKey::generate(&mut csprng);
        let sig_verifying = sig_signing.verifying_key();
        Self {
            enc_secret,
            enc_public,
            sig_signing,
            sig_verifying,
        }
    }

    pub fn epk(&self) -> Epk {
        Epk::from_parts(self.enc_public.to_bytes(), self.sig_verifying.to_bytes())
    }

    pub fn enc_public(&self) -> [u8; ENC_KEY_SIZE] {
        self.enc_public.to_bytes()
    }

    pub fn sig_public(&self) -> [u8; SIG_KEY_SIZE] {
        self.sig_verifying.to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.sig_signing.sign(msg).to_bytes()
    }

    fn shared_secret(&self, their_enc_pk: &[u8; ENC_KEY_SIZE]) -> [u8; 32] {
        *self
            .enc_secret
            .diffie_hellman(&XPublicKey::from(*their_enc_pk))
            .as_bytes()
    }

    /// Serialize the secret halves (`{ENC secret: 32 || SIG seed: 32}`) for
    /// an identity file. Callers own persistence.
    pub fn to_secret_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.enc_secret.to_bytes());
        out[32..].copy_from_slice(&self.sig_signing.to_bytes());
        out
    }

    /// Rebuild a keypair from bytes written by [`Self::to_secret_bytes`].
    pub fn from_secret_bytes(bytes: &[u8; 64]) -> Self {
        let mut enc_bytes = [0u8; 32];
        enc_bytes.copy_from_slice(&bytes[..32]);
        let mut sig_seed = [0u8; 32];
        sig_seed.copy_from_slice(&bytes[32..]);

        let enc_secret = XStaticSecret::from(enc_bytes);
        let enc_public = XPublicKey::from(&enc_secret);
        let sig_signing = SigningKey::from_bytes(&sig_seed);
        let sig_verifying = sig_signing.verifying_key();
        Self {
            enc_secret,
            enc_public,
            sig_signing,
            sig_verifying,
        }
    }
}

impl Drop for ExtendedKeypair {
    fn drop(&mut self) {
        // `StaticSecret`/`SigningKey` zeroize themselves via the `zeroize`
        // feature; nothing additional to scrub here.
    }
}

/// Verify a detached ed25519 signature against a raw SIG public key.
pub fn verify(sig_pk: &[u8; SIG_KEY_SIZE], msg: &[u8], sig: &[u8; SIGNATURE_SIZE]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(sig_pk) else {
        return false;
    };
    verifying_key
        .verify(msg, &Signature::from_bytes(sig))
        .is_ok()
}

/// Fresh random 24-byte nonce for the AEAD envelope.
pub fn new_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// Fresh random 64-bit value, used for announce `req_id`/`ping_id`.
pub fn random_64b() -> u64 {
    rand::rng().next_u64()
}

fn derive_session_key(shared: &[u8; 32]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut key = [0u8; 32];
    hkdf.expand(SESSION_KEY_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Seal `plaintext` for `recv_enc_pk` using our encryption secret key.
/// Returns ciphertext with the 16-byte Poly1305 MAC appended.
pub fn encrypt(
    recv_enc_pk: &[u8; ENC_KEY_SIZE],
    send_keypair: &ExtendedKeypair,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let shared = send_keypair.shared_secret(recv_enc_pk);
    let mut key = derive_session_key(&shared);
    let cipher = XChaCha20Poly1305::new_from_slice(&key).expect("key is 32 bytes");
    let result = cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::Decrypt);
    key.zeroize();
    result
}

/// Open a payload sealed with [`encrypt`], using the sender's ENC public key
/// and our own encryption secret key.
pub fn decrypt(
    send_enc_pk: &[u8; ENC_KEY_SIZE],
    recv_keypair: &ExtendedKeypair,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let shared = recv_keypair.shared_secret(send_enc_pk);
    let mut key = derive_session_key(&shared);
    let cipher = XChaCha20Poly1305::new_from_slice(&key).expect("key is 32 bytes");
    let result = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decrypt);
    key.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = ExtendedKeypair::generate();
        let msg = b"hello group";
        let sig = kp.sign(msg);
        assert!(verify(&kp.sig_public(), msg, &sig));
    }

    #[test]
    fn tampered_signature_fails() {
        let kp = ExtendedKeypair::generate();
        let msg = b"hello group";
        let mut sig = kp.sign(msg);
        sig[0] ^= 0xFF;
        assert!(!verify(&kp.sig_public(), msg, &sig));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let alice = ExtendedKeypair::generate();
        let bob = ExtendedKeypair::generate();
        let nonce = new_nonce();

        let ct = encrypt(&bob.enc_public(), &alice, &nonce, b"secret payload").unwrap();
        let pt = decrypt(&alice.enc_public(), &bob, &nonce, &ct).unwrap();
        assert_eq!(pt, b"secret payload");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let alice = ExtendedKeypair::generate();
        let bob = ExtendedKeypair::generate();
        let nonce = new_nonce();

        let mut ct = encrypt(&bob.enc_public(), &alice, &nonce, b"secret payload").unwrap();
        ct[0] ^= 0xFF;
        assert!(decrypt(&alice.enc_public(), &bob, &nonce, &ct).is_err());
    }

    #[test]
    fn secret_bytes_roundtrip_preserves_identity() {
        let kp = ExtendedKeypair::generate();
        let epk = kp.epk();
        let restored = ExtendedKeypair::from_secret_bytes(&kp.to_secret_bytes());
        assert_eq!(restored.epk(), epk);
    }

    #[test]
    fn epk_xor_distance_ordering() {
        let a = Epk::from_bytes([0u8; EPK_SIZE]);
        let mut close_bytes = [0u8; EPK_SIZE];
        close_bytes[0] = 0x01;
        let close = Epk::from_bytes(close_bytes);
        let mut far_bytes = [0u8; EPK_SIZE];
        far_bytes[0] = 0xF0;
        let far = Epk::from_bytes(far_bytes);

        assert!(close.closer_than(&a, &far));
        assert!(!far.closer_than(&a, &close));
    }
}

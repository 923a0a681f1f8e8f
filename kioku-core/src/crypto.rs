//! # Cryptographic Primitives
//!
//! Integrity and confidentiality for persisted store files.
//!
//! ## Key Components
//!
//! 1. **Checksums**: CRC32 over plaintext streams to catch torn or corrupted files
//! 2. **Key derivation**: PBKDF2-HMAC-SHA256 turns a passphrase into a 256-bit key
//! 3. **Sealing**: AES-256-GCM authenticated encryption of a whole byte stream
//!
//! ## Envelope Layout
//!
//! ```text
//! ┌──────────┬─────────┬────────────┬───────────┬────────────┬───────────────────┐
//! │ "KVE1"   │ version │ iterations │ salt (16) │ nonce (12) │ ciphertext || tag │
//! │ 4 bytes  │ u32 LE  │ u32 LE     │           │            │ len(plain) + 16   │
//! └──────────┴─────────┴────────────┴───────────┴────────────┴───────────────────┘
//!  └─────────────── authenticated as AAD (40 bytes) ───────────┘
//! ```
//!
//! Salt and nonce are fresh per seal, so sealing the same plaintext twice
//! yields different envelopes. Any change to header or ciphertext, or a
//! wrong passphrase, fails the tag check.

use std::num::NonZeroU32;

use crc32fast::Hasher as Crc32Hasher;
use rand::Rng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

pub const ENVELOPE_MAGIC: &[u8; 4] = b"KVE1";
pub const ENVELOPE_VERSION: u32 = 1;
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;
pub const ENVELOPE_HEADER_LEN: usize = 4 + 4 + 4 + SALT_LEN + NONCE_LEN;

/// Most PBKDF2 rounds an envelope may carry. `open` refuses anything above it
/// so a crafted header cannot stall the loader, and `seal` refuses to write
/// an envelope `open` would reject.
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

/// Fast CRC32 checksum for data integrity
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify CRC32 checksum
pub fn verify_crc32(data: &[u8], expected: u32) -> bool {
    crc32_checksum(data) == expected
}

/// Key derivation function for encryption keys
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; KEY_LEN]> {
    let iterations = NonZeroU32::new(iterations).ok_or_else(|| Error::Configuration {
        message: "KDF iterations must be non-zero".to_string(),
    })?;

    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password,
        &mut key,
    );
    Ok(key)
}

/// Generate a random alphanumeric passphrase
pub fn generate_key(length: usize) -> String {
    const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// True if `bytes` starts with the envelope magic
pub fn is_sealed(bytes: &[u8]) -> bool {
    bytes.len() >= ENVELOPE_MAGIC.len() && &bytes[..ENVELOPE_MAGIC.len()] == ENVELOPE_MAGIC
}

fn build_key(passphrase: &str, salt: &[u8], iterations: u32) -> Result<LessSafeKey> {
    let key_bytes = derive_key(passphrase.as_bytes(), salt, iterations)?;
    let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| Error::Internal {
        message: "AES-256-GCM key setup failed".to_string(),
    })?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `passphrase`, returning a self-describing envelope
pub fn seal(plaintext: &[u8], passphrase: &str, iterations: u32) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(Error::invalid_input("encryption key must not be empty"));
    }
    if iterations == 0 || iterations > MAX_KDF_ITERATIONS {
        return Err(Error::Configuration {
            message: format!(
                "KDF iterations must be between 1 and {}, got {}",
                MAX_KDF_ITERATIONS, iterations
            ),
        });
    }

    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut salt)
        .and_then(|_| rng.fill(&mut nonce_bytes))
        .map_err(|_| Error::Internal {
            message: "system random source unavailable".to_string(),
        })?;

    let mut header = Vec::with_capacity(ENVELOPE_HEADER_LEN);
    header.extend_from_slice(ENVELOPE_MAGIC);
    header.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
    header.extend_from_slice(&iterations.to_le_bytes());
    header.extend_from_slice(&salt);
    header.extend_from_slice(&nonce_bytes);

    let key = build_key(passphrase, &salt, iterations)?;
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::from(&header[..]),
        &mut in_out,
    )
    .map_err(|_| Error::Internal {
        message: "AES-256-GCM seal failed".to_string(),
    })?;

    let mut out = header;
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt an envelope produced by [`seal`]
pub fn open(envelope: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(Error::invalid_input("encryption key must not be empty"));
    }
    if !is_sealed(envelope) {
        return Err(Error::format("missing encryption envelope magic"));
    }
    if envelope.len() < ENVELOPE_HEADER_LEN + TAG_LEN {
        return Err(Error::format("encrypted envelope is truncated"));
    }

    let (header, ciphertext) = envelope.split_at(ENVELOPE_HEADER_LEN);
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != ENVELOPE_VERSION {
        return Err(Error::format(format!(
            "unsupported encryption envelope version: {}",
            version
        )));
    }
    let iterations = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if iterations == 0 || iterations > MAX_KDF_ITERATIONS {
        return Err(Error::format(format!("implausible KDF iteration count: {}", iterations)));
    }

    let salt = &header[12..12 + SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&header[12 + SALT_LEN..ENVELOPE_HEADER_LEN]);

    let key = build_key(passphrase, salt, iterations)?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(header),
            &mut in_out,
        )
        .map_err(|_| Error::decryption("wrong key or corrupted ciphertext"))?;
    let len = plaintext.len();
    in_out.truncate(len);
    Ok(in_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERS: u32 = 1_000;

    #[test]
    fn test_checksums() {
        let data = b"test data";
        let checksum = crc32_checksum(data);
        assert!(verify_crc32(data, checksum));
        assert!(!verify_crc32(b"tampered", checksum));
    }

    #[test]
    fn test_derive_key_deterministic() {
        let a = derive_key(b"secret", b"salt-salt-salt-!", ITERS).unwrap();
        let b = derive_key(b"secret", b"salt-salt-salt-!", ITERS).unwrap();
        let c = derive_key(b"secret", b"other-salt-here!", ITERS).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(derive_key(b"secret", b"salt", 0).is_err());
    }

    #[test]
    fn test_seal_open() {
        let sealed = seal(b"hello vectors", "MySecretKey", ITERS).unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(sealed.len(), ENVELOPE_HEADER_LEN + 13 + TAG_LEN);
        assert_eq!(open(&sealed, "MySecretKey").unwrap(), b"hello vectors");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let a = seal(b"same", "k", ITERS).unwrap();
        let b = seal(b"same", "k", ITERS).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key() {
        let sealed = seal(b"payload", "right", ITERS).unwrap();
        let err = open(&sealed, "wrong").unwrap_err();
        assert_eq!(err.error_code(), "DECRYPTION_FAILED");
    }

    #[test]
    fn test_tampered_header_and_body() {
        let sealed = seal(b"payload", "k", ITERS).unwrap();

        let mut body = sealed.clone();
        let last = body.len() - 1;
        body[last] ^= 0x01;
        assert!(matches!(open(&body, "k"), Err(Error::Decryption { .. })));

        // Salt is authenticated twice over: it feeds the KDF and the AAD.
        let mut header = sealed.clone();
        header[12] ^= 0x01;
        assert!(matches!(open(&header, "k"), Err(Error::Decryption { .. })));
    }

    #[test]
    fn test_truncated_envelope() {
        let sealed = seal(b"payload", "k", ITERS).unwrap();
        assert!(matches!(open(&sealed[..20], "k"), Err(Error::Format { .. })));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(seal(b"x", "", ITERS), Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_seal_rejects_iterations_open_would_refuse() {
        for iterations in [0, MAX_KDF_ITERATIONS + 1, u32::MAX] {
            assert!(
                matches!(seal(b"x", "k", iterations), Err(Error::Configuration { .. })),
                "iterations {}",
                iterations
            );
        }
    }

    #[test]
    fn test_generate_key() {
        let key = generate_key(32);
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_key(32));
    }
}

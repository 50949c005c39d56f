// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authenticated box cipher used to seal DNSCrypt payloads.
//
// Sealed layout of `XChaCha20Box` (libsodium crypto_secretbox_xchacha20poly1305):
//   [16 bytes: Poly1305 tag]
//   [N bytes:  XChaCha20 ciphertext]
//
// Keystream block 0 supplies the one-time Poly1305 key (bytes 0..32) and
// encrypts the first 32 bytes of the message (bytes 32..64).

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Extended nonce size (bytes).
pub const NONCE_SIZE: usize = 24;
/// Client-chosen half of the nonce (bytes).
pub const HALF_NONCE_SIZE: usize = NONCE_SIZE / 2;
/// Poly1305 authentication tag size (bytes).
pub const TAG_SIZE: usize = 16;
/// Symmetric key size (bytes).
pub const SHARED_KEY_SIZE: usize = 32;

const POLY1305_KEY_SIZE: usize = 32;

pub type Nonce = [u8; NONCE_SIZE];

/// Symmetric key shared between a client and one resolver.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; SHARED_KEY_SIZE]);

impl SharedKey {
    pub fn new(bytes: [u8; SHARED_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice; `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; SHARED_KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey([REDACTED])")
    }
}

/// Opaque failure from [`BoxCipher::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("box authentication failed")]
pub struct OpenError;

/// Authenticated encryption with a 24-byte nonce and a 16-byte tag.
///
/// `seal` output is exactly `TAG_SIZE` bytes longer than its input, and
/// `open` must never return plaintext for a sealed box that fails
/// verification.
pub trait BoxCipher: Send + Sync {
    fn seal(&self, nonce: &Nonce, plaintext: &[u8], key: &SharedKey) -> Vec<u8>;

    fn open(&self, nonce: &Nonce, sealed: &[u8], key: &SharedKey) -> Result<Vec<u8>, OpenError>;
}

/// XChaCha20-Poly1305 in the NaCl secretbox construction, as spoken by
/// DNSCrypt v2 resolvers.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaCha20Box;

impl XChaCha20Box {
    /// Run the keystream over `[0; 32] || data` and split off the Poly1305 key.
    fn apply(nonce: &Nonce, data: &[u8], key: &SharedKey) -> ([u8; POLY1305_KEY_SIZE], Vec<u8>) {
        let mut buf = vec![0u8; POLY1305_KEY_SIZE + data.len()];
        buf[POLY1305_KEY_SIZE..].copy_from_slice(data);

        let mut stream = XChaCha20::new(
            chacha20::Key::from_slice(key.as_bytes()),
            chacha20::XNonce::from_slice(nonce),
        );
        stream.apply_keystream(&mut buf);

        let mut otk = [0u8; POLY1305_KEY_SIZE];
        otk.copy_from_slice(&buf[..POLY1305_KEY_SIZE]);
        let out = buf.split_off(POLY1305_KEY_SIZE);
        buf.zeroize();
        (otk, out)
    }

    fn tag(otk: &[u8; POLY1305_KEY_SIZE], ciphertext: &[u8]) -> [u8; TAG_SIZE] {
        let tag = Poly1305::new(poly1305::Key::from_slice(otk)).compute_unpadded(ciphertext);
        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        out
    }
}

impl BoxCipher for XChaCha20Box {
    fn seal(&self, nonce: &Nonce, plaintext: &[u8], key: &SharedKey) -> Vec<u8> {
        let (mut otk, ciphertext) = Self::apply(nonce, plaintext, key);
        let tag = Self::tag(&otk, &ciphertext);
        otk.zeroize();

        let mut sealed = Vec::with_capacity(TAG_SIZE + ciphertext.len());
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&ciphertext);
        sealed
    }

    fn open(&self, nonce: &Nonce, sealed: &[u8], key: &SharedKey) -> Result<Vec<u8>, OpenError> {
        if sealed.len() < TAG_SIZE {
            return Err(OpenError);
        }
        let (tag, ciphertext) = sealed.split_at(TAG_SIZE);

        let (mut otk, mut plaintext) = Self::apply(nonce, ciphertext, key);
        let expected = Self::tag(&otk, ciphertext);
        otk.zeroize();
        if !bool::from(expected[..].ct_eq(tag)) {
            plaintext.zeroize();
            return Err(OpenError);
        }
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SharedKey {
        SharedKey::new([0x42; SHARED_KEY_SIZE])
    }

    /// Sealed boxes produced by libsodium's
    /// `crypto_secretbox_xchacha20poly1305_easy` (key 0x42.., nonce 00..17,
    /// plaintext byte i = i * 7 + 3).
    const LIBSODIUM_VECTORS: &[(usize, &str)] = &[
        (0, "00177d351a8085bff9b7173ef0f7188f"),
        (
            31,
            concat!(
                "b28c9b86aecf3f1a2252088f837d1498b168e6925e9d8ceb1d41f4e5404ae842c59cc83bd870669c",
                "f51502cfe19b2c",
            ),
        ),
        (
            32,
            concat!(
                "88927aaffe8d67466e976ca3fffa95ceb168e6925e9d8ceb1d41f4e5404ae842c59cc83bd870669c",
                "f51502cfe19b2cc6",
            ),
        ),
        (
            33,
            concat!(
                "cece67ce6dc6c34c3ddd9f36f8c09c71b168e6925e9d8ceb1d41f4e5404ae842c59cc83bd870669c",
                "f51502cfe19b2cc66f",
            ),
        ),
        (
            300,
            concat!(
                "7a201a8abff9374e32612317ec8a9aaab168e6925e9d8ceb1d41f4e5404ae842c59cc83bd870669c",
                "f51502cfe19b2cc66f16751f38a7cad4e9448d763506bbf282836ad2ecd9372923d20b253575dd42",
                "8da7b528407ff55bad03f2aa2379d8aea0e8180a2ccfba8802d5888259f6db5cfc0ed6f9a4b1717c",
                "5df4ba5bfbfa52baa505a24f98ad964d1a9031051108fbb9bc1e20d803837585308fde7e5ac808fb",
                "21457dbe1dfccc908c769f48d6ec997d0e27f0e6bfd1d0ad171e584c38d85a815b00a7ab37170c53",
                "7bef5c99ee22074f784cdd852432b96f6d0e9da78d3f3336d527ba4122235e76b597526536985202",
                "9d98360357f3be7c8f3c9979ff945dc92564784ab8ebcfce200fdf37353ef81165d747ebcd2cf76b",
                "7b06090f43d4b21f2b8c6ff5ee7808571aa9b57e210b0319259739fb4cc54eb48b911e8b",
            ),
        ),
    ];

    fn vector_plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn vector_nonce() -> Nonce {
        let mut nonce = [0u8; NONCE_SIZE];
        for (i, b) in nonce.iter_mut().enumerate() {
            *b = i as u8;
        }
        nonce
    }

    #[test]
    fn seal_matches_libsodium_secretbox() {
        for &(len, expected) in LIBSODIUM_VECTORS {
            let sealed = XChaCha20Box.seal(&vector_nonce(), &vector_plaintext(len), &key());
            assert_eq!(hex::encode(&sealed), expected, "len {len}");
        }
    }

    #[test]
    fn open_accepts_libsodium_secretbox() {
        for &(len, sealed) in LIBSODIUM_VECTORS {
            let sealed = hex::decode(sealed).unwrap();
            let opened = XChaCha20Box.open(&vector_nonce(), &sealed, &key()).unwrap();
            assert_eq!(opened, vector_plaintext(len), "len {len}");
        }
    }

    #[test]
    fn seal_open_roundtrip() {
        let nonce = [7u8; NONCE_SIZE];
        let sealed = XChaCha20Box.seal(&nonce, b"dnscrypt payload", &key());
        assert_eq!(sealed.len(), 16 + TAG_SIZE);

        let opened = XChaCha20Box.open(&nonce, &sealed, &key()).unwrap();
        assert_eq!(opened, b"dnscrypt payload");
    }

    #[test]
    fn seal_spans_multiple_blocks() {
        let nonce = [1u8; NONCE_SIZE];
        let plaintext: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let sealed = XChaCha20Box.seal(&nonce, &plaintext, &key());
        assert_ne!(&sealed[TAG_SIZE..], &plaintext[..]);
        assert_eq!(XChaCha20Box.open(&nonce, &sealed, &key()).unwrap(), plaintext);
    }

    #[test]
    fn open_wrong_nonce_fails() {
        let sealed = XChaCha20Box.seal(&[1u8; NONCE_SIZE], b"query", &key());
        assert_eq!(XChaCha20Box.open(&[2u8; NONCE_SIZE], &sealed, &key()), Err(OpenError));
    }

    #[test]
    fn open_wrong_key_fails() {
        let nonce = [3u8; NONCE_SIZE];
        let sealed = XChaCha20Box.seal(&nonce, b"query", &key());
        let other = SharedKey::new([0x24; SHARED_KEY_SIZE]);
        assert!(XChaCha20Box.open(&nonce, &sealed, &other).is_err());
    }

    #[test]
    fn open_truncated_fails() {
        assert!(XChaCha20Box.open(&[0u8; NONCE_SIZE], &[0u8; TAG_SIZE - 1], &key()).is_err());
    }

    #[test]
    fn empty_plaintext_is_tag_only() {
        let nonce = [9u8; NONCE_SIZE];
        let sealed = XChaCha20Box.seal(&nonce, &[], &key());
        assert_eq!(sealed.len(), TAG_SIZE);
        assert!(XChaCha20Box.open(&nonce, &sealed, &key()).unwrap().is_empty());
    }

    #[test]
    fn shared_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", key()), "SharedKey([REDACTED])");
        assert!(SharedKey::from_slice(&[0u8; 31]).is_none());
    }
}

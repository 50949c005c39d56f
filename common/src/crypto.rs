// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNSCrypt v2 query encryption and response decryption (client side).
//
// Wire format (client → resolver):
//   [8 bytes:  client magic (per-server, from the certificate)]
//   [32 bytes: client public key]
//   [12 bytes: client nonce half]
//   [N bytes:  sealed padded query (tag + ciphertext)]
//
// Wire format (resolver → client):
//   [8 bytes:  server magic "r6fnvWj8"]
//   [24 bytes: nonce (client half || server half)]
//   [N bytes:  sealed padded response (tag + ciphertext)]

use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::cipher::{BoxCipher, Nonce, SharedKey, XChaCha20Box, HALF_NONCE_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::estimator::QuestionSizeEstimator;
use crate::padding::{pad, unpad};
use crate::protocol::{MAX_DNS_PACKET_SIZE, MAX_DNS_UDP_PACKET_SIZE, MIN_DNS_PACKET_SIZE};

/// Prefix of every response frame.
pub const SERVER_MAGIC: [u8; 8] = [0x72, 0x36, 0x66, 0x6e, 0x76, 0x57, 0x6a, 0x38];
/// Client magic (query frame prefix) size (bytes).
pub const CLIENT_MAGIC_LEN: usize = 8;
/// Client public key size (bytes).
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Bytes a response frame adds around its padded payload.
pub const RESPONSE_OVERHEAD: usize = SERVER_MAGIC.len() + NONCE_SIZE + TAG_SIZE;
/// Bytes a query frame adds in front of its sealed payload.
pub const QUERY_HEADER_LEN: usize = CLIENT_MAGIC_LEN + PUBLIC_KEY_SIZE + HALF_NONCE_SIZE;

/// Padded lengths are quantized to this block size.
const PADDING_BLOCK: usize = 64;

const _: () = assert!(RESPONSE_OVERHEAD < MAX_DNS_UDP_PACKET_SIZE);

pub type ClientNonce = [u8; HALF_NONCE_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: need at least {min} bytes, got {got}")]
    TooShort { min: usize, got: usize },

    #[error("frame too long: at most {max} bytes, got {got}")]
    TooLong { max: usize, got: usize },

    #[error("unexpected frame prefix")]
    BadMagic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("question too large; cannot be padded ({len} bytes, padded length {padded_length})")]
    QuestionTooLarge { len: usize, padded_length: usize },

    #[error("invalid message size or prefix: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("unexpected nonce")]
    UnexpectedNonce,

    #[error("incorrect tag")]
    IncorrectTag,

    #[error("incorrect padding")]
    IncorrectPadding,
}

/// Per-server material resolved from the server certificate.
#[derive(Debug, Clone)]
pub struct ServerKeyBundle {
    pub magic_query: [u8; CLIENT_MAGIC_LEN],
    pub shared_key: SharedKey,
}

impl ServerKeyBundle {
    pub fn new(magic_query: [u8; CLIENT_MAGIC_LEN], shared_key: SharedKey) -> Self {
        Self {
            magic_query,
            shared_key,
        }
    }
}

/// Long-term client identity sent in every query frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdentity {
    pub public_key: [u8; PUBLIC_KEY_SIZE],
}

impl ClientIdentity {
    pub fn new(public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self { public_key }
    }
}

/// Padding strategy for an outgoing query.
#[derive(Clone, Copy)]
pub enum TransportHint<'a> {
    /// Pad to at least the estimator's minimum question size.
    Udp(&'a dyn QuestionSizeEstimator),
    /// Pad with up to 255 random bytes.
    Tcp,
}

impl std::fmt::Debug for TransportHint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp(estimator) => f
                .debug_struct("Udp")
                .field("min_question_size", &estimator.min_question_size())
                .finish(),
            Self::Tcp => f.write_str("Tcp"),
        }
    }
}

/// An encrypted query frame and the nonce half needed to verify its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedQuery {
    pub frame: Vec<u8>,
    pub client_nonce: ClientNonce,
}

/// Padded question length for a minimum question size: rounded up to a
/// multiple of 64, clamped to the maximum UDP packet size.
pub fn padded_length(min_question_size: usize) -> usize {
    let unclamped = min_question_size.max(RESPONSE_OVERHEAD);
    let rounded = unclamped.saturating_add(PADDING_BLOCK - 1) & !(PADDING_BLOCK - 1);
    rounded.min(MAX_DNS_UDP_PACKET_SIZE)
}

/// DNSCrypt query/response codec over a [`BoxCipher`].
#[derive(Debug, Clone, Default)]
pub struct QueryCipher<C = XChaCha20Box> {
    cipher: C,
}

impl<C: BoxCipher> QueryCipher<C> {
    pub fn new(cipher: C) -> Self {
        Self { cipher }
    }

    /// Encrypt a DNS query for `server`.
    ///
    /// The returned `client_nonce` must be kept until the response arrives
    /// and passed to [`QueryCipher::decrypt`]; a fresh one is drawn on every
    /// call.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        server: &ServerKeyBundle,
        client: &ClientIdentity,
        transport: TransportHint<'_>,
        packet: &[u8],
    ) -> Result<EncryptedQuery, Error> {
        let mut client_nonce = [0u8; HALF_NONCE_SIZE];
        rng.fill_bytes(&mut client_nonce);
        let mut nonce: Nonce = [0u8; NONCE_SIZE];
        nonce[..HALF_NONCE_SIZE].copy_from_slice(&client_nonce);

        let required = RESPONSE_OVERHEAD + packet.len();
        let min_question_size = match transport {
            TransportHint::Udp(estimator) => estimator.min_question_size().max(required),
            TransportHint::Tcp => {
                let mut xpad = [0u8; 1];
                rng.fill_bytes(&mut xpad);
                required + xpad[0] as usize
            }
        };

        let padded_length = padded_length(min_question_size);
        if required + 1 > padded_length {
            debug!(len = packet.len(), padded_length, "question too large");
            return Err(Error::QuestionTooLarge {
                len: packet.len(),
                padded_length,
            });
        }

        let padded = pad(packet, padded_length - RESPONSE_OVERHEAD);
        let sealed = self.cipher.seal(&nonce, &padded, &server.shared_key);

        let mut frame = Vec::with_capacity(QUERY_HEADER_LEN + sealed.len());
        frame.extend_from_slice(&server.magic_query);
        frame.extend_from_slice(&client.public_key);
        frame.extend_from_slice(&client_nonce);
        frame.extend_from_slice(&sealed);

        Ok(EncryptedQuery {
            frame,
            client_nonce,
        })
    }

    /// Verify and decrypt a response frame from `server`.
    ///
    /// `client_nonce` is the half returned by the [`QueryCipher::encrypt`]
    /// call this frame answers.
    pub fn decrypt(
        &self,
        server: &ServerKeyBundle,
        frame: &[u8],
        client_nonce: &ClientNonce,
    ) -> Result<Vec<u8>, Error> {
        let magic_len = SERVER_MAGIC.len();
        let header_len = magic_len + NONCE_SIZE;
        let min = header_len + TAG_SIZE + MIN_DNS_PACKET_SIZE;
        let max = header_len + TAG_SIZE + MAX_DNS_PACKET_SIZE;

        if frame.len() < min {
            return Err(FrameError::TooShort { min, got: frame.len() }.into());
        }
        if frame.len() > max {
            return Err(FrameError::TooLong { max, got: frame.len() }.into());
        }
        if frame[..magic_len] != SERVER_MAGIC {
            return Err(FrameError::BadMagic.into());
        }

        let mut server_nonce: Nonce = [0u8; NONCE_SIZE];
        server_nonce.copy_from_slice(&frame[magic_len..header_len]);
        if !bool::from(server_nonce[..HALF_NONCE_SIZE].ct_eq(&client_nonce[..])) {
            debug!("response nonce does not match query");
            return Err(Error::UnexpectedNonce);
        }

        let padded = self
            .cipher
            .open(&server_nonce, &frame[header_len..], &server.shared_key)
            .map_err(|_| Error::IncorrectTag)?;

        match unpad(&padded) {
            Ok(packet) if packet.len() >= MIN_DNS_PACKET_SIZE => Ok(packet.to_vec()),
            _ => Err(Error::IncorrectPadding),
        }
    }
}

/// Encrypt a query with the default cipher and the OS random number generator.
pub fn encrypt_query(
    server: &ServerKeyBundle,
    client: &ClientIdentity,
    transport: TransportHint<'_>,
    packet: &[u8],
) -> Result<EncryptedQuery, Error> {
    QueryCipher::new(XChaCha20Box).encrypt(&mut rand::rngs::OsRng, server, client, transport, packet)
}

/// Decrypt a response with the default cipher.
pub fn decrypt_response(
    server: &ServerKeyBundle,
    frame: &[u8],
    client_nonce: &ClientNonce,
) -> Result<Vec<u8>, Error> {
    QueryCipher::new(XChaCha20Box).decrypt(server, frame, client_nonce)
}

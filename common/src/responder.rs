// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resolver side of the DNSCrypt exchange: open query frames, seal responses.
//
// The response nonce echoes the client half and appends a server-chosen
// half, which is what `QueryCipher::decrypt` checks against the query.

use rand::{CryptoRng, RngCore};

use crate::cipher::{BoxCipher, Nonce, SharedKey, HALF_NONCE_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::crypto::{
    ClientNonce, CLIENT_MAGIC_LEN, PUBLIC_KEY_SIZE, QUERY_HEADER_LEN, RESPONSE_OVERHEAD,
    SERVER_MAGIC,
};
use crate::padding::{pad, unpad};
use crate::protocol::{MAX_DNS_PACKET_SIZE, MIN_DNS_PACKET_SIZE};

/// Response payloads are padded to a multiple of this many bytes.
const RESPONSE_PADDING_BLOCK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("query frame too short: need at least {min} bytes, got {got}")]
    QueryTooShort { min: usize, got: usize },

    #[error("query frame does not carry the expected client magic")]
    UnknownMagic,

    #[error("incorrect tag")]
    IncorrectTag,

    #[error("incorrect padding")]
    IncorrectPadding,

    #[error("response too large: {len} bytes")]
    ResponseTooLarge { len: usize },
}

/// A decrypted query frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedQuery {
    pub client_public_key: [u8; PUBLIC_KEY_SIZE],
    pub client_nonce: ClientNonce,
    pub packet: Vec<u8>,
}

/// Verify and decrypt a query frame addressed to `magic_query`.
pub fn open_query<C: BoxCipher>(
    cipher: &C,
    frame: &[u8],
    magic_query: &[u8; CLIENT_MAGIC_LEN],
    shared_key: &SharedKey,
) -> Result<OpenedQuery, Error> {
    let min = QUERY_HEADER_LEN + TAG_SIZE + MIN_DNS_PACKET_SIZE + 1;
    if frame.len() < min {
        return Err(Error::QueryTooShort {
            min,
            got: frame.len(),
        });
    }
    if frame[..CLIENT_MAGIC_LEN] != magic_query[..] {
        return Err(Error::UnknownMagic);
    }

    let mut client_public_key = [0u8; PUBLIC_KEY_SIZE];
    client_public_key.copy_from_slice(&frame[CLIENT_MAGIC_LEN..CLIENT_MAGIC_LEN + PUBLIC_KEY_SIZE]);
    let mut client_nonce = [0u8; HALF_NONCE_SIZE];
    client_nonce.copy_from_slice(&frame[CLIENT_MAGIC_LEN + PUBLIC_KEY_SIZE..QUERY_HEADER_LEN]);

    let mut nonce: Nonce = [0u8; NONCE_SIZE];
    nonce[..HALF_NONCE_SIZE].copy_from_slice(&client_nonce);

    let padded = cipher
        .open(&nonce, &frame[QUERY_HEADER_LEN..], shared_key)
        .map_err(|_| Error::IncorrectTag)?;
    let packet = unpad(&padded).map_err(|_| Error::IncorrectPadding)?;

    Ok(OpenedQuery {
        client_public_key,
        client_nonce,
        packet: packet.to_vec(),
    })
}

/// Seal a DNS response for the query that carried `client_nonce`.
pub fn seal_response<C: BoxCipher, R: RngCore + CryptoRng>(
    cipher: &C,
    rng: &mut R,
    packet: &[u8],
    client_nonce: &ClientNonce,
    shared_key: &SharedKey,
) -> Result<Vec<u8>, Error> {
    let padded_len = (packet.len() + 1).div_ceil(RESPONSE_PADDING_BLOCK) * RESPONSE_PADDING_BLOCK;
    let padded_len = padded_len.min(MAX_DNS_PACKET_SIZE);
    if packet.len() + 1 > padded_len {
        return Err(Error::ResponseTooLarge { len: packet.len() });
    }

    let mut nonce: Nonce = [0u8; NONCE_SIZE];
    nonce[..HALF_NONCE_SIZE].copy_from_slice(client_nonce);
    rng.fill_bytes(&mut nonce[HALF_NONCE_SIZE..]);

    let sealed = cipher.seal(&nonce, &pad(packet, padded_len), shared_key);

    let mut frame = Vec::with_capacity(RESPONSE_OVERHEAD + padded_len);
    frame.extend_from_slice(&SERVER_MAGIC);
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&sealed);
    Ok(frame)
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNSCrypt Common — Wire encryption for DNSCrypt v2 queries and responses
//
// Stack:
//   Box:      XChaCha20 + Poly1305, secretbox layout (tag || ciphertext)
//   Padding:  0x80 delimiter + zeros, quantized to 64-byte blocks
//   Nonce:    12 random client bytes + 12 server bytes
//   RNG:      OsRng in production, injected per call

pub mod cipher;
pub mod crypto;
pub mod estimator;
pub mod padding;
pub mod protocol;
pub mod responder;

pub use cipher::{BoxCipher, SharedKey, XChaCha20Box};
pub use crypto::{
    decrypt_response, encrypt_query, ClientIdentity, ClientNonce, EncryptedQuery, Error,
    QueryCipher, ServerKeyBundle, TransportHint,
};
pub use estimator::{AdaptiveSizeEstimator, QuestionSizeEstimator};
pub use protocol::Transport;

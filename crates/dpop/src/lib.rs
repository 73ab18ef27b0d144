//! DPoP (Demonstrating Proof-of-Possession, RFC 9449) signing
//!
//! Binds tokens to a P-256 key by attaching a signed, single-use proof to
//! every request, and transparently answers server nonce challenges:
//! - `DpopKey` / `Es256Generator` produce proofs
//! - `NonceCache` remembers the latest nonce per origin (bounded LRU)
//! - `DpopSigner::sign_and_send` runs the one-shot nonce retry
//! - `DpopClient` wraps any `HttpClient` so token endpoint and PAR calls
//!   are signed too

pub mod client;
pub mod error;
pub mod key;
pub mod nonce;
pub mod proof;
pub mod signer;

pub use client::DpopClient;
pub use error::{Error, Result};
pub use key::{DpopKey, Jwk};
pub use nonce::NonceCache;
pub use proof::{Es256Generator, ProofGenerator, ProofParameters, token_hash};
pub use signer::{DPOP_HEADER, DPOP_NONCE_HEADER, DpopSigner};

//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! One verifier is generated per authorization attempt. The challenge goes
//! out with the authorization request; the verifier stays local until the
//! token exchange, where the server hashes it and compares.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{CHALLENGE_METHOD_S256, VERIFIER_ALPHABET, VERIFIER_LENGTH};

/// The hashed verifier and the label of the hash that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Challenge {
    pub value: String,
    pub method: String,
}

/// A verifier/challenge pair. Invariant: `hash(verifier) == challenge.value`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PkceVerifier {
    verifier: String,
    challenge: Challenge,
}

impl PkceVerifier {
    /// Generate an S256 pair.
    pub fn generate() -> Self {
        Self::with_hash(CHALLENGE_METHOD_S256, compute_challenge)
    }

    /// Generate a pair with a caller-supplied hash function and method label.
    pub fn with_hash(method: impl Into<String>, hash: impl Fn(&str) -> String) -> Self {
        let verifier = random_string(VERIFIER_LENGTH);
        let challenge = Challenge {
            value: hash(&verifier),
            method: method.into(),
        };
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Cryptographically random string of `length` characters from
/// [`VERIFIER_ALPHABET`].
///
/// Bytes at or above the largest multiple of the alphabet size are
/// rejected so every character is equally likely.
pub fn random_string(length: usize) -> String {
    let alphabet_len = VERIFIER_ALPHABET.len();
    let limit = (256 / alphabet_len) * alphabet_len;
    let mut out = String::with_capacity(length);
    let mut bytes = [0u8; 64];
    let mut rng = rand::rng();

    while out.len() < length {
        rng.fill(&mut bytes);
        for &b in bytes.iter().filter(|&&b| (b as usize) < limit) {
            if out.len() == length {
                break;
            }
            out.push(VERIFIER_ALPHABET[b as usize % alphabet_len] as char);
        }
    }
    out
}

//! P-256 binding key
//!
//! A `DpopKey` is the raw private scalar plus a stable id. It serializes so
//! an application can persist it next to the login it is bound to: tokens
//! issued against one key are useless with another.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::SigningKey;
use rand::RngExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Attempts at drawing a valid scalar before giving up. A random 32-byte
/// string is out of range with probability ~2^-32.
const MAX_GENERATE_ATTEMPTS: usize = 8;

/// Private key material and id used for DPoP signing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpopKey {
    pub id: Uuid,
    #[serde(serialize_with = "encode_key", deserialize_with = "decode_key")]
    data: Vec<u8>,
}

impl DpopKey {
    /// Generate a fresh P-256 key.
    ///
    /// `SigningKey::random` wants a `rand_core` 0.6 RNG, which `rand::rng()`
    /// is not, so the scalar is drawn as bytes and range-checked instead.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 32];

        for _ in 0..MAX_GENERATE_ATTEMPTS {
            rng.fill(&mut bytes);
            if SigningKey::from_slice(&bytes).is_ok() {
                let key = Self::from_bytes(&bytes);
                bytes.zeroize();
                return key;
            }
        }
        bytes.zeroize();
        Err(Error::Signing("could not draw a valid P-256 scalar".into()))
    }

    /// Wrap an existing raw P-256 scalar, assigning a new id.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        SigningKey::from_slice(data)
            .map_err(|e| Error::Signing(format!("invalid P-256 private key: {e}")))?;
        Ok(Self {
            id: Uuid::new_v4(),
            data: data.to_vec(),
        })
    }

    pub fn signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_slice(&self.data)
            .map_err(|e| Error::Signing(format!("invalid P-256 private key: {e}")))
    }

    /// Public half as a JWK.
    pub fn public_jwk(&self) -> Result<Jwk> {
        Ok(Jwk::from_signing_key(&self.signing_key()?))
    }
}

impl fmt::Debug for DpopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DpopKey")
            .field("id", &self.id)
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl Drop for DpopKey {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

fn encode_key<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&URL_SAFE_NO_PAD.encode(data))
}

fn decode_key<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// EC public key in JWK form, as embedded in every proof header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    pub fn from_signing_key(key: &SigningKey) -> Self {
        let point = key.verifying_key().to_encoded_point(false);
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: URL_SAFE_NO_PAD.encode(point.x().map(|x| x.as_slice()).unwrap_or(&[])),
            y: URL_SAFE_NO_PAD.encode(point.y().map(|y| y.as_slice()).unwrap_or(&[])),
        }
    }

    /// RFC 7638 thumbprint: SHA-256 over the members in lexicographic order.
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            self.crv, self.kty, self.x, self.y
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = DpopKey::generate().unwrap();
        let b = DpopKey::generate().unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.public_jwk().unwrap(), b.public_jwk().unwrap());
    }

    #[test]
    fn serde_roundtrip_preserves_key() {
        let key = DpopKey::generate().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let restored: DpopKey = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, key.id);
        assert_eq!(restored.public_jwk().unwrap(), key.public_jwk().unwrap());
    }

    #[test]
    fn zero_scalar_is_rejected() {
        assert!(matches!(DpopKey::from_bytes(&[0u8; 32]), Err(Error::Signing(_))));
        assert!(matches!(DpopKey::from_bytes(&[1u8; 5]), Err(Error::Signing(_))));
    }

    #[test]
    fn debug_hides_key_material() {
        let key = DpopKey::generate().unwrap();
        let json = serde_json::to_value(&key).unwrap();
        let encoded = json["data"].as_str().unwrap().to_string();
        assert!(!format!("{key:?}").contains(&encoded));
    }

    #[test]
    fn jwk_coordinates_are_32_bytes() {
        let jwk = DpopKey::generate().unwrap().public_jwk().unwrap();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv, "P-256");
        assert_eq!(URL_SAFE_NO_PAD.decode(&jwk.x).unwrap().len(), 32);
        assert_eq!(URL_SAFE_NO_PAD.decode(&jwk.y).unwrap().len(), 32);
        assert_eq!(jwk.thumbprint().len(), 43);
    }
}

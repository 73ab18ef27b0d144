//! DPoP proof construction (RFC 9449)
//!
//! A proof is a compact JWS with `typ: dpop+jwt`, the signer's public JWK in
//! the header and the request binding (`htm`, `htu`, `ath`, `nonce`) in the
//! claims. `ProofGenerator` is the seam: `Es256Generator` signs with a
//! P-256 key, tests and hardware-backed keys plug in their own.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::key::{DpopKey, Jwk};

/// JWS `typ` for DPoP proofs
pub const PROOF_TYPE: &str = "dpop+jwt";

/// JWS `alg` produced by [`Es256Generator`]
pub const ALGORITHM_ES256: &str = "ES256";

/// Seconds between a proof's `iat` and `exp`
pub const PROOF_LIFETIME_SECS: u64 = 60;

/// Everything a generator needs to bind one proof to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofParameters {
    pub key_type: String,
    pub http_method: String,
    /// Request URL without query and fragment
    pub request_endpoint: String,
    pub nonce: Option<String>,
    /// `ath`: base64url SHA-256 of the access token
    pub token_hash: Option<String>,
    /// Origin of the authorization server that issued the token
    pub issuing_server: Option<String>,
}

/// Produces a signed proof string for a set of parameters.
pub trait ProofGenerator: Send + Sync {
    fn generate(&self, params: &ProofParameters) -> Result<String>;
}

impl<F> ProofGenerator for F
where
    F: Fn(&ProofParameters) -> Result<String> + Send + Sync,
{
    fn generate(&self, params: &ProofParameters) -> Result<String> {
        self(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofHeader {
    pub alg: String,
    pub typ: String,
    pub jwk: Jwk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
    pub jti: String,
    pub htm: String,
    pub htu: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// ES256 generator over a P-256 key.
pub struct Es256Generator {
    key: SigningKey,
    jwk: Jwk,
}

impl Es256Generator {
    pub fn new(key: &DpopKey) -> Result<Self> {
        let key = key.signing_key()?;
        let jwk = Jwk::from_signing_key(&key);
        Ok(Self { key, jwk })
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }
}

impl fmt::Debug for Es256Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Es256Generator")
            .field("jwk", &self.jwk)
            .finish_non_exhaustive()
    }
}

impl ProofGenerator for Es256Generator {
    fn generate(&self, params: &ProofParameters) -> Result<String> {
        let iat = oauth_core::now_millis() / 1000;

        let header = ProofHeader {
            alg: ALGORITHM_ES256.to_string(),
            typ: params.key_type.clone(),
            jwk: self.jwk.clone(),
        };
        let claims = ProofClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            htm: params.http_method.clone(),
            htu: params.request_endpoint.clone(),
            iat,
            exp: iat + PROOF_LIFETIME_SECS,
            nonce: params.nonce.clone(),
            ath: params.token_hash.clone(),
            iss: params.issuing_server.clone(),
        };

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| Error::Signing(format!("serializing proof header: {e}")))?;
        let claims_json = serde_json::to_vec(&claims)
            .map_err(|e| Error::Signing(format!("serializing proof claims: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature: Signature = self
            .key
            .try_sign(signing_input.as_bytes())
            .map_err(|e| Error::Signing(format!("signing proof: {e}")))?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }
}

/// `ath` value for an access token: base64url SHA-256 without padding.
pub fn token_hash(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Decode a compact proof without checking its signature.
pub fn decode_unverified(proof: &str) -> Result<(ProofHeader, ProofClaims)> {
    let mut parts = proof.split('.');
    let (Some(header), Some(claims), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Signing("proof is not a compact JWS".into()));
    };

    let decode = |segment: &str| {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| Error::Signing(format!("invalid base64 in proof: {e}")))
    };
    let header = serde_json::from_slice(&decode(header)?)
        .map_err(|e| Error::Signing(format!("invalid proof header: {e}")))?;
    let claims = serde_json::from_slice(&decode(claims)?)
        .map_err(|e| Error::Signing(format!("invalid proof claims: {e}")))?;
    Ok((header, claims))
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::VerifyingKey;
    use p256::ecdsa::signature::Verifier;

    use super::*;

    fn params() -> ProofParameters {
        ProofParameters {
            key_type: PROOF_TYPE.to_string(),
            http_method: "POST".to_string(),
            request_endpoint: "https://auth.example.com/token".to_string(),
            nonce: Some("n-1".to_string()),
            token_hash: Some(token_hash("TOKEN")),
            issuing_server: Some("https://auth.example.com".to_string()),
        }
    }

    #[test]
    fn proof_header_and_claims_carry_request_binding() {
        let generator = Es256Generator::new(&DpopKey::generate().unwrap()).unwrap();
        let proof = generator.generate(&params()).unwrap();

        let (header, claims) = decode_unverified(&proof).unwrap();
        assert_eq!(header.typ, "dpop+jwt");
        assert_eq!(header.alg, "ES256");
        assert_eq!(&header.jwk, generator.jwk());
        assert_eq!(claims.htm, "POST");
        assert_eq!(claims.htu, "https://auth.example.com/token");
        assert_eq!(claims.nonce.as_deref(), Some("n-1"));
        assert_eq!(claims.ath, Some(token_hash("TOKEN")));
        assert_eq!(claims.iss.as_deref(), Some("https://auth.example.com"));
        assert_eq!(claims.exp, claims.iat + PROOF_LIFETIME_SECS);
    }

    #[test]
    fn proof_signature_verifies_with_signer_public_key() {
        let key = DpopKey::generate().unwrap();
        let proof = Es256Generator::new(&key).unwrap().generate(&params()).unwrap();

        let (signing_input, signature) = proof.rsplit_once('.').unwrap();
        let signature =
            Signature::from_slice(&URL_SAFE_NO_PAD.decode(signature).unwrap()).unwrap();
        let verifying_key = VerifyingKey::from(&key.signing_key().unwrap());
        assert!(
            verifying_key
                .verify(signing_input.as_bytes(), &signature)
                .is_ok()
        );
    }

    #[test]
    fn every_proof_has_a_fresh_jti() {
        let generator = Es256Generator::new(&DpopKey::generate().unwrap()).unwrap();
        let (_, a) = decode_unverified(&generator.generate(&params()).unwrap()).unwrap();
        let (_, b) = decode_unverified(&generator.generate(&params()).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn absent_optional_claims_are_omitted() {
        let generator = Es256Generator::new(&DpopKey::generate().unwrap()).unwrap();
        let proof = generator
            .generate(&ProofParameters {
                nonce: None,
                token_hash: None,
                issuing_server: None,
                ..params()
            })
            .unwrap();

        let claims_segment = proof.split('.').nth(1).unwrap();
        let json = String::from_utf8(URL_SAFE_NO_PAD.decode(claims_segment).unwrap()).unwrap();
        assert!(!json.contains("nonce"));
        assert!(!json.contains("ath"));
        assert!(!json.contains("iss"));
    }

    #[test]
    fn closures_are_generators() {
        let generator =
            |params: &ProofParameters| Ok::<_, Error>(format!("fake-{}", params.http_method));
        assert_eq!(generator.generate(&params()).unwrap(), "fake-POST");
    }

    #[test]
    fn token_hash_matches_known_value() {
        // SHA256("hello") base64url without padding
        assert_eq!(token_hash("hello"), "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
    }

    #[test]
    fn malformed_proofs_are_rejected() {
        assert!(decode_unverified("only.two").is_err());
        assert!(decode_unverified("a.b.c.d").is_err());
        assert!(decode_unverified("!!.??.sig").is_err());
    }
}

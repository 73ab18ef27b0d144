//! OAuth wire constants (RFC 6749, RFC 7636)

/// `grant_type` for the authorization code exchange
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// `grant_type` for refreshing an access token
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// `response_type` requested from the authorization endpoint
pub const RESPONSE_TYPE_CODE: &str = "code";

/// PKCE challenge method label for SHA-256 + base64url
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Length of the PKCE verifier drawn from [`VERIFIER_ALPHABET`]
pub const VERIFIER_LENGTH: usize = 64;

/// Alphabet the PKCE verifier is drawn from
pub const VERIFIER_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Token type the bearer flow expects from the token endpoint
pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Content type for token endpoint and PAR requests
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub const JSON_CONTENT_TYPE: &str = "application/json";

//! Web origin (`scheme://host[:port]`) computation
//!
//! Origins partition DPoP nonce state and decide whether a request targets
//! the authorization server. Default ports are elided for http(s)/ws(s);
//! other schemes keep an explicit port.

use http::Uri;

const INSECURE_SCHEMES: &[&str] = &["http", "ws"];
const SECURE_SCHEMES: &[&str] = &["https", "wss"];

/// Origin of an absolute URI, or `None` for relative URIs.
pub fn origin(uri: &Uri) -> Option<String> {
    let scheme = uri.scheme_str()?.to_ascii_lowercase();
    let host = uri.host()?.to_ascii_lowercase();
    let mut origin = format!("{scheme}://{host}");

    let Some(port) = uri.port_u16() else {
        return Some(origin);
    };

    let is_insecure = INSECURE_SCHEMES.contains(&scheme.as_str());
    let is_secure = SECURE_SCHEMES.contains(&scheme.as_str());
    let is_default_port = (is_insecure && port == 80) || (is_secure && port == 443);

    if !is_default_port {
        origin.push_str(&format!(":{port}"));
    }
    Some(origin)
}

/// Origin of a URI given as a string.
pub fn origin_of(uri: &str) -> Option<String> {
    uri.parse::<Uri>().ok().as_ref().and_then(origin)
}

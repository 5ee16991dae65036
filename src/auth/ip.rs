//! Client address extraction for per-client rate limiting.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::request::Parts};

/// Key used when neither a forwarded header nor a peer address is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract the client IP address.
///
/// With `trust_proxy`, the first `X-Forwarded-For` entry wins. Otherwise,
/// or when the header is absent, the peer address from `ConnectInfo` is
/// used, then [`UNKNOWN_CLIENT`].
pub fn extract_client_ip<T: HasHeadersAndExtensions>(source: &T, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = source
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    source
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

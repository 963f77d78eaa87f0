//! Origin validation against DNS rebinding.

use axum::extract::Request;
use axum::http::header::{HOST, ORIGIN};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use url::{Host, Url};

use crate::types::McpError;

/// Decide whether a browser `Origin` may talk to this server.
///
/// A missing origin is allowed (non-browser clients). Loopback origins are
/// allowed. Any other origin must name exactly the `Host` the request was sent to.
pub fn is_origin_allowed(origin: Option<&str>, host: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    let Some(origin_host) = url.host() else {
        return false;
    };

    let loopback = match &origin_host {
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => ip.octets() == [127, 0, 0, 1],
        Host::Ipv6(ip) => ip.is_loopback(),
    };
    if loopback {
        return true;
    }

    let Some(host) = host else {
        return false;
    };
    // Ports are compared after filling in the scheme default on both sides.
    let origin_port = url.port_or_known_default();
    let (host_name, host_port) = split_authority(host);
    host_name.eq_ignore_ascii_case(&origin_host.to_string())
        && host_port.or(origin_port) == origin_port
}

/// Split a `Host` header into name and explicit port. `[v6]:port` is handled;
/// an unparsable port leaves the whole value as the name.
fn split_authority(authority: &str) -> (&str, Option<u16>) {
    match authority.rfind(':') {
        Some(i) if !authority[i..].contains(']') => match authority[i + 1..].parse::<u16>() {
            Ok(port) => (&authority[..i], Some(port)),
            Err(_) => (authority, None),
        },
        _ => (authority, None),
    }
}

/// Middleware rejecting disallowed origins with 403 before any session logic runs.
pub async fn origin_guard(request: Request, next: Next) -> Response {
    let headers = request.headers();
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());

    if !is_origin_allowed(origin, host) {
        let origin = origin.unwrap_or_default().to_string();
        tracing::warn!("Rejected request from origin {origin}");
        return McpError::Forbidden(format!("Origin not allowed: {origin}")).into_response();
    }
    next.run(request).await
}

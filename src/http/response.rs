//! Responses the proxy writes itself.
//!
//! # Responsibilities
//! - Literal status responses (self-check, 404, 400, 413)
//! - CORS preflight answers on the agent path
//! - 301 redirects from `http` to `https`
//! - Serialising loopback responses back onto the client connection

use http::HeaderMap;

use crate::http::request::{title_case, Headers};

/// Answer to the status page check.
pub const SELF_CHECK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Access-Control-Allow-Origin: *\r\n\
Cache-Control: no-cache, no-store, must-revalidate\r\n\
Pragma: no-cache\r\n\
Expires: 0\r\n\
Content-Type: text/plain\r\n\
Keep-Alive:\r\n\
Persist:\r\n\
Connection: Keep-Alive, Persist\r\n\
Content-Length: 2\r\n\
\r\n\
OK";

/// Sent in reply to CONNECT before the tunnel is inspected.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Methods the agent can carry.
pub const AGENT_METHODS: &str = "GET, POST, HEAD, PUT, DELETE, PATCH";

pub const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";

pub const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

pub const PAYLOAD_TOO_LARGE: &[u8] =
    b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Build the CORS preflight answer for an OPTIONS request.
///
/// Echoes `Access-Control-Request-Headers` when present and the request's
/// `Origin`, falling back to `*`.
pub fn preflight(request_headers: &Headers) -> Vec<u8> {
    let mut out = String::from(
        "HTTP/1.1 200 OK\r\n\
         Access-Control-Allow-Credentials: true\r\n",
    );
    out.push_str("Access-Control-Allow-Methods: ");
    out.push_str(AGENT_METHODS);
    out.push_str("\r\nAccess-Control-Max-Age: 1728000\r\n");
    if let Some(requested) = request_headers.get("Access-Control-Request-Headers") {
        out.push_str("Access-Control-Allow-Headers: ");
        out.push_str(requested);
        out.push_str("\r\n");
    }
    out.push_str("Access-Control-Allow-Origin: ");
    out.push_str(request_headers.get("Origin").unwrap_or("*"));
    out.push_str("\r\nContent-Length: 0\r\n\r\n");
    out.into_bytes()
}

/// 301 to the `https` form of a plain `http` URL.
pub fn https_redirect(url: &str) -> Vec<u8> {
    let target = match url.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => format!("https://{}", &url[7..]),
        _ => url.to_string(),
    };
    format!("HTTP/1.1 301 Moved Permanently\r\nLocation: {target}\r\nContent-Length: 0\r\n\r\n")
        .into_bytes()
}

/// Serialise a response produced by the loopback client.
///
/// Headers are written as given; `Content-Length` is expected among them.
pub fn local_response(status: u16, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\n").into_bytes();
    for (name, value) in headers.iter() {
        out.extend_from_slice(title_case(name.as_str()).as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn preflight_with_origin_and_requested_headers() {
        let headers: Headers = [
            ("Origin", "https://a.example"),
            ("Access-Control-Request-Headers", "x-foo, content-type"),
        ]
        .into_iter()
        .collect();
        let response = text(&preflight(&headers));

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Access-Control-Allow-Origin: https://a.example\r\n"));
        assert!(response.contains("Access-Control-Allow-Headers: x-foo, content-type\r\n"));
        assert!(response.contains("Access-Control-Allow-Credentials: true\r\n"));
        assert!(response.contains("Access-Control-Allow-Methods: GET, POST, HEAD, PUT, DELETE, PATCH\r\n"));
        assert!(response.contains("Access-Control-Max-Age: 1728000\r\n"));
        assert!(response.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn preflight_without_origin_allows_any() {
        let response = text(&preflight(&Headers::new()));
        assert!(response.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(!response.contains("Access-Control-Allow-Headers"));
    }

    #[test]
    fn redirect_swaps_scheme() {
        let response = text(&https_redirect("http://www.google.com/search?q=1"));
        assert!(response.starts_with("HTTP/1.1 301 "));
        assert!(response.contains("Location: https://www.google.com/search?q=1\r\n"));
        assert!(response.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn self_check_body_matches_length() {
        let response = text(SELF_CHECK_RESPONSE);
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        assert_eq!(body, "OK");
    }

    #[test]
    fn local_response_writes_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "5".parse().unwrap());
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());
        let response = text(&local_response(200, &headers, b"hello"));

        assert!(response.starts_with("HTTP/1.1 200\r\n"));
        assert!(response.contains("Content-Length: 5\r\n"));
        assert!(response.contains("Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n"));
        assert!(response.ends_with("\r\n\r\nhello"));
    }
}

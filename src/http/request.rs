//! Request head parsing and the per-transaction request context.
//!
//! # Responsibilities
//! - Read the request line and header block off a buffered connection
//! - Normalise header names to title case
//! - Rebuild the absolute URL, host and upstream path for routing
//! - Cache the request body so it is read from the socket at most once

use std::collections::BTreeMap;

use bytes::Bytes;
use http::{Method, Uri};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{ProxyError, Result};
use crate::http::framing::{read_body, Framing};

/// Maximum number of header lines accepted in one request.
const MAX_HEADERS: usize = 128;

/// Title-case a header name: `content-length` becomes `Content-Length`.
///
/// Every alphabetic run starts upper-case and continues lower-case.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if c.is_ascii_alphabetic() {
            if at_word_start {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c.to_ascii_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Header map keyed by title-cased name.
///
/// Repeated headers are folded into one comma-separated value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(title_case(name), value.into());
    }

    /// Add `name`, folding into an existing value.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.0
            .entry(title_case(name))
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(&value);
            })
            .or_insert(value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&title_case(name)).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&title_case(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&title_case(name))
    }

    /// Whether a comma-separated header lists `token` (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}

/// Request line and headers as received.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as on the request line.
    pub target: String,
    /// HTTP minor version (0 or 1).
    pub version: u8,
    pub headers: Headers,
}

impl RequestHead {
    /// Parse a complete head (request line, headers, blank line).
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(buf) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(ProxyError::bad_request("incomplete request head"))
            }
            Err(e) => return Err(ProxyError::bad_request(format!("invalid request head: {e}"))),
        }

        let method = req
            .method
            .ok_or_else(|| ProxyError::bad_request("missing method"))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProxyError::bad_request(format!("invalid method {method:?}")))?;
        let target = req
            .path
            .ok_or_else(|| ProxyError::bad_request("missing request target"))?
            .to_string();
        let headers = req
            .headers
            .iter()
            .map(|h| (h.name, String::from_utf8_lossy(h.value).into_owned()))
            .collect();

        Ok(Self {
            method,
            target,
            version: req.version.unwrap_or(1),
            headers,
        })
    }

    /// Read the next head from `reader`.
    ///
    /// Returns `None` if the peer closed the connection before sending
    /// anything. Blank lines ahead of the request line are skipped.
    pub async fn read<R>(reader: &mut R, max_size: usize) -> Result<Option<Self>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::with_capacity(1024);
        loop {
            let remaining = max_size.saturating_sub(buf.len());
            if remaining == 0 {
                return Err(ProxyError::bad_request("request head too large"));
            }

            let start = buf.len();
            let n = (&mut *reader)
                .take(remaining as u64)
                .read_until(b'\n', &mut buf)
                .await?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }

            let line = &buf[start..];
            if !line.ends_with(b"\n") {
                // hit the size limit mid-line
                continue;
            }
            let blank = line == b"\r\n" || line == b"\n";
            if blank && start == 0 {
                buf.clear();
                continue;
            }
            if blank {
                return Self::parse(&buf).map(Some);
            }
        }
    }
}

/// Split `host[:port]` (or `[v6]:port`) into host and optional port.
pub fn split_host_port(authority: &str) -> (&str, Option<u16>) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (authority, None),
        },
        _ => (authority, None),
    }
}

/// State of one HTTP transaction.
///
/// Built fresh for every request on a connection, so nothing leaks from
/// one keep-alive transaction into the next.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    /// Target exactly as received.
    pub raw_target: String,
    pub version: u8,
    /// Destination authority (`host[:port]`).
    pub host: String,
    /// Lower-cased destination host without port, used for routing.
    pub host_name: String,
    pub scheme: &'static str,
    /// Absolute URL of the request.
    pub url: String,
    /// Path and query sent upstream.
    pub path: String,
    pub headers: Headers,
    pub close_after_response: bool,
    payload: Option<Bytes>,
}

impl RequestContext {
    /// Resolve host, URL and path from a parsed head.
    ///
    /// `scheme` reflects whether the connection is currently TLS.
    pub fn from_head(head: RequestHead, scheme: &'static str) -> Result<Self> {
        let RequestHead {
            method,
            target,
            version,
            headers,
        } = head;

        let (host, url, path) = if target.starts_with('/') {
            let host = headers
                .get("Host")
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ProxyError::bad_request("origin-form request without Host"))?
                .to_string();
            let url = format!("{scheme}://{host}{target}");
            (host, url, target.clone())
        } else {
            let uri: Uri = target
                .parse()
                .map_err(|e| ProxyError::bad_request(format!("invalid target {target:?}: {e}")))?;
            let authority = uri
                .authority()
                .ok_or_else(|| ProxyError::bad_request(format!("target {target:?} has no host")))?;
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "/".to_string());
            (authority.as_str().to_string(), target.clone(), path)
        };

        let host_name = split_host_port(&host).0.to_ascii_lowercase();

        Ok(Self {
            method,
            raw_target: target,
            version,
            host,
            host_name,
            scheme,
            url,
            path,
            headers,
            close_after_response: false,
            payload: None,
        })
    }

    /// Host forms checked against the local-address classifier: the Host
    /// header, its part before the port, and the derived host name.
    pub fn local_candidates(&self) -> Vec<String> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(header) = self.headers.get("Host") {
            candidates.push(header.to_string());
            if let Some((addr, _)) = header.rsplit_once(':') {
                candidates.push(addr.to_string());
            }
        }
        candidates.push(self.host_name.clone());
        candidates
    }

    /// Framing the client declared for the body.
    pub fn framing(&self) -> Result<Framing> {
        Framing::from_headers(&self.headers)
    }

    /// Whether a body was declared but has not been read yet.
    pub fn has_unread_payload(&self) -> bool {
        self.payload.is_none() && !matches!(self.framing(), Ok(Framing::Empty))
    }

    /// Read the body, or return the copy cached by an earlier call.
    pub async fn read_payload<R>(&mut self, reader: &mut R, limit: usize) -> Result<Bytes>
    where
        R: AsyncBufRead + Unpin,
    {
        if let Some(payload) = &self.payload {
            return Ok(payload.clone());
        }
        let payload = read_body(reader, self.framing()?, limit).await?;
        self.payload = Some(payload.clone());
        Ok(payload)
    }

    /// Whether the connection may carry another request after this one.
    pub fn keep_alive(&self) -> bool {
        if self.close_after_response {
            return false;
        }
        let head_close = self.headers.has_token("Connection", "close")
            || self.headers.has_token("Proxy-Connection", "close");
        let old_client = self.version == 0
            && !self.headers.has_token("Connection", "keep-alive")
            && !self.headers.has_token("Proxy-Connection", "keep-alive");
        !(head_close || old_client)
    }
}

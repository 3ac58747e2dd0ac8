//! Request body framing.
//!
//! Bodies are either `Content-Length` delimited, chunked, or absent. The
//! chunked decoder is lenient: chunk extensions, trailers and a missing
//! CRLF after chunk data are logged and tolerated, while a size line that
//! does not parse as hex fails the request.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::warn;

use crate::error::{ProxyError, Result};
use crate::http::request::Headers;

/// Longest accepted chunk size line, including its CRLF.
pub const MAX_CHUNK_LINE: usize = 65537;

/// How the body of a request is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body.
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

impl Framing {
    /// `Content-Length` takes precedence over `Transfer-Encoding`.
    pub fn from_headers(headers: &Headers) -> Result<Self> {
        if let Some(value) = headers.get("Content-Length") {
            let len = value.trim().parse::<u64>().map_err(|_| {
                ProxyError::bad_request(format!("invalid Content-Length {value:?}"))
            })?;
            return Ok(Framing::Length(len));
        }
        let chunked = headers
            .get("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        Ok(if chunked { Framing::Chunked } else { Framing::Empty })
    }
}

/// Read a complete body from `reader`.
///
/// Fails with [`ProxyError::BodyTooLarge`] before reading anything when a
/// declared length exceeds `limit`, or as soon as decoded chunks do.
pub async fn read_body<R>(reader: &mut R, framing: Framing, limit: usize) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::Empty => Ok(Bytes::new()),
        Framing::Length(len) => {
            if len > limit as u64 {
                return Err(ProxyError::BodyTooLarge { limit });
            }
            let mut body = Vec::with_capacity(len as usize);
            read_exactly(reader, len, &mut body, 0).await?;
            Ok(body.into())
        }
        Framing::Chunked => read_chunked(reader, limit).await,
    }
}

async fn read_chunked<R>(reader: &mut R, limit: usize) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        let line = read_line(reader, MAX_CHUNK_LINE).await?;
        if line.is_empty() {
            return Err(ProxyError::TruncatedBody {
                expected: None,
                received: body.len() as u64,
            });
        }

        let text = String::from_utf8_lossy(&line);
        let (size_token, extension) = match text.split_once(';') {
            Some((size, ext)) => (size, Some(ext)),
            None => (text.as_ref(), None),
        };
        let size = u64::from_str_radix(size_token.trim(), 16)
            .map_err(|_| ProxyError::MalformedChunkHeader(text.trim_end().to_string()))?;

        if let Some(ext) = extension.map(str::trim).filter(|e| !e.is_empty()) {
            warn!(extension = ext, "Ignoring chunk extension");
        }

        if size == 0 {
            skip_trailers(reader).await?;
            return Ok(body.freeze());
        }

        if size > (limit as u64).saturating_sub(body.len() as u64) {
            return Err(ProxyError::BodyTooLarge { limit });
        }

        let mut chunk = Vec::with_capacity(size as usize);
        read_exactly(reader, size, &mut chunk, body.len() as u64).await?;
        body.extend_from_slice(&chunk);

        let terminator = read_line(reader, 2).await?;
        if terminator != b"\r\n" {
            warn!(terminator = ?String::from_utf8_lossy(&terminator), "Chunk not followed by CRLF");
        }
    }
}

async fn skip_trailers<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = read_line(reader, MAX_CHUNK_LINE).await?;
        if line.is_empty() || line == b"\r\n" || line == b"\n" {
            return Ok(());
        }
        warn!(trailer = ?String::from_utf8_lossy(&line).trim_end(), "Ignoring chunked trailer");
    }
}

/// Read one line of at most `limit` bytes. Empty at end of stream.
async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut line)
        .await?;
    Ok(line)
}

/// Append exactly `len` bytes to `out`. `already` counts body bytes read
/// before this call and is only used to report truncation.
async fn read_exactly<R>(reader: &mut R, len: u64, out: &mut Vec<u8>, already: u64) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let n = (&mut *reader).take(len).read_to_end(out).await? as u64;
    if n < len {
        return Err(ProxyError::TruncatedBody {
            expected: Some(already + len),
            received: already + n,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn chunked(input: &[u8]) -> Result<Bytes> {
        let mut reader = input;
        read_body(&mut reader, Framing::Chunked, 1024).await
    }

    #[test]
    fn framing_from_headers() {
        let headers: Headers = [("content-length", "12")].into_iter().collect();
        assert_eq!(Framing::from_headers(&headers).unwrap(), Framing::Length(12));

        let headers: Headers = [("transfer-encoding", "gzip, Chunked")].into_iter().collect();
        assert_eq!(Framing::from_headers(&headers).unwrap(), Framing::Chunked);

        assert_eq!(Framing::from_headers(&Headers::new()).unwrap(), Framing::Empty);

        let headers: Headers = [("Content-Length", "twelve")].into_iter().collect();
        assert!(matches!(Framing::from_headers(&headers), Err(ProxyError::BadRequest(_))));
    }

    #[tokio::test]
    async fn decodes_chunks() {
        let body = chunked(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn zero_chunk_only_is_empty() {
        assert!(chunked(b"0\r\n\r\n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tolerates_extensions_trailers_and_missing_crlf() {
        let body = chunked(b"5;name=val\r\nhelloXX3\r\nabc\r\n0\r\nExpires: never\r\n\r\n").await;
        // "XX" replaces the CRLF, so the next size line is "3"
        assert_eq!(body.unwrap(), Bytes::from_static(b"helloabc"));
    }

    #[tokio::test]
    async fn leaves_following_request_unread() {
        let mut reader: &[u8] = b"3\r\nabc\r\n0\r\n\r\nGET / HTTP/1.1\r\n";
        let body = read_body(&mut reader, Framing::Chunked, 1024).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"abc"));
        assert_eq!(reader, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn non_hex_size_is_malformed() {
        let err = chunked(b"zz\r\nhello\r\n0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedChunkHeader(ref line) if line == "zz"));
    }

    #[tokio::test]
    async fn truncated_chunk_is_reported() {
        let err = chunked(b"a\r\nhel").await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::TruncatedBody { expected: Some(10), received: 3 }
        ));

        let err = chunked(b"3\r\nabc\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::TruncatedBody { expected: None, received: 3 }));
    }

    #[tokio::test]
    async fn fixed_length_body() {
        let mut reader: &[u8] = b"abcdef";
        let body = read_body(&mut reader, Framing::Length(4), 1024).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"abcd"));
        assert_eq!(reader, b"ef");

        let mut short: &[u8] = b"ab";
        let err = read_body(&mut short, Framing::Length(4), 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::TruncatedBody { expected: Some(4), received: 2 }));
    }

    #[tokio::test]
    async fn enforces_limit() {
        let mut reader: &[u8] = b"abcdef";
        let err = read_body(&mut reader, Framing::Length(6), 4).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 4 }));

        let mut reader: &[u8] = b"3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n";
        let err = read_body(&mut reader, Framing::Chunked, 4).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn huge_chunk_size_is_rejected_by_limit() {
        let err = chunked(b"1\r\na\r\nffffffffffffffff\r\nzz\r\n0\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 1024 }));
    }
}

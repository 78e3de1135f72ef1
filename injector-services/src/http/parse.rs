//! Hand-rolled HTTP/1.1 head parsing over `httparse`, reusing the owned-buffer
//! read idiom monoio's I/O traits require (see the `IoBufMut`/`slice_mut`
//! pattern used throughout this workspace for fixed-size and
//! prefix-detecting reads).

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use monoio::buf::IoBufMut;
use monoio::io::AsyncReadRent;

use super::message::{RequestHead, ResponseHead};

const MAX_HEADERS: usize = 64;
const INITIAL_BUF: usize = 4096;

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("connection closed before a complete head was received")]
    Eof,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed HTTP head: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("head exceeded the maximum allowed size ({0} bytes)")]
    TooLarge(usize),
    #[error("unsupported HTTP method: {0}")]
    BadMethod(String),
    #[error("malformed header field")]
    BadHeader,
}

/// The bytes read while hunting for the head terminator. `leftover()` is
/// whatever body bytes were read past the head in the same read() call and
/// must be consumed before reading more from the stream.
pub struct HeadBuffer {
    buf: Vec<u8>,
    head_len: usize,
    filled: usize,
}

impl HeadBuffer {
    pub fn leftover(&self) -> &[u8] {
        &self.buf[self.head_len..self.filled]
    }
}

pub async fn read_request_head<S>(
    stream: &mut S,
    max_len: usize,
) -> Result<(RequestHead, HeadBuffer), ParseError>
where
    S: AsyncReadRent,
{
    let mut owned = vec![0u8; INITIAL_BUF];
    let mut filled = 0usize;
    loop {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut storage);
        match parsed.parse(&owned[..filled]) {
            Ok(httparse::Status::Complete(head_len)) => {
                let head = build_request_head(&parsed)?;
                return Ok((
                    head,
                    HeadBuffer {
                        buf: owned,
                        head_len,
                        filled,
                    },
                ));
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(ParseError::Malformed(e)),
        }
        if filled >= max_len {
            return Err(ParseError::TooLarge(max_len));
        }
        if filled == owned.len() {
            owned.resize((owned.len() * 2).min(max_len.max(owned.len() + 1)), 0);
        }
        let cap = owned.len();
        let slice = owned.slice_mut(filled..cap);
        let (res, slice) = stream.read(slice).await;
        owned = slice.into_inner();
        let n = res?;
        if n == 0 {
            return Err(ParseError::Eof);
        }
        filled += n;
    }
}

pub async fn read_response_head<S>(
    stream: &mut S,
    max_len: usize,
) -> Result<(ResponseHead, HeadBuffer), ParseError>
where
    S: AsyncReadRent,
{
    let mut owned = vec![0u8; INITIAL_BUF];
    let mut filled = 0usize;
    loop {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut storage);
        match parsed.parse(&owned[..filled]) {
            Ok(httparse::Status::Complete(head_len)) => {
                let head = build_response_head(&parsed)?;
                return Ok((
                    head,
                    HeadBuffer {
                        buf: owned,
                        head_len,
                        filled,
                    },
                ));
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(ParseError::Malformed(e)),
        }
        if filled >= max_len {
            return Err(ParseError::TooLarge(max_len));
        }
        if filled == owned.len() {
            owned.resize((owned.len() * 2).min(max_len.max(owned.len() + 1)), 0);
        }
        let cap = owned.len();
        let slice = owned.slice_mut(filled..cap);
        let (res, slice) = stream.read(slice).await;
        owned = slice.into_inner();
        let n = res?;
        if n == 0 {
            return Err(ParseError::Eof);
        }
        filled += n;
    }
}

fn build_request_head(parsed: &httparse::Request) -> Result<RequestHead, ParseError> {
    let method_str = parsed.method.ok_or(ParseError::BadHeader)?;
    let method =
        Method::from_bytes(method_str.as_bytes()).map_err(|_| ParseError::BadMethod(method_str.to_string()))?;
    let raw_target = parsed.path.ok_or(ParseError::BadHeader)?.to_string();
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(ParseError::BadHeader),
    };
    let headers = build_header_map(parsed.headers)?;
    Ok(RequestHead {
        method,
        raw_target,
        version,
        headers,
    })
}

fn build_response_head(parsed: &httparse::Response) -> Result<ResponseHead, ParseError> {
    let code = parsed.code.ok_or(ParseError::BadHeader)?;
    let status = StatusCode::from_u16(code).map_err(|_| ParseError::BadHeader)?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(ParseError::BadHeader),
    };
    let headers = build_header_map(parsed.headers)?;
    Ok(ResponseHead {
        status,
        version,
        headers,
    })
}

pub(crate) fn build_header_map(raw: &[httparse::Header]) -> Result<HeaderMap, ParseError> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw {
        if h.name.is_empty() {
            continue;
        }
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| ParseError::BadHeader)?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| ParseError::BadHeader)?;
        map.append(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET http://example/ HTTP/1.1\r\nHost: example\r\n\r\nhello";
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut storage);
        let httparse::Status::Complete(head_len) = parsed.parse(raw).unwrap() else {
            panic!("expected a complete head");
        };
        let head = build_request_head(&parsed).unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.raw_target, "http://example/");
        assert_eq!(&raw[head_len..], b"hello");
    }

    #[test]
    fn parses_connect_authority_form() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\n\r\n";
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut storage);
        parsed.parse(raw).unwrap();
        let head = build_request_head(&parsed).unwrap();
        assert!(head.is_connect());
        assert_eq!(head.host(), Some("example.com"));
        assert_eq!(head.port(), Some(443));
    }

    #[test]
    fn parses_response_head() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut storage);
        parsed.parse(raw).unwrap();
        let head = build_response_head(&parsed).unwrap();
        assert_eq!(head.status, StatusCode::OK);
    }

    #[test]
    fn accepts_token_shaped_method() {
        let raw = b"PURGE /x HTTP/1.1\r\n\r\n";
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut storage);
        parsed.parse(raw).unwrap();
        assert!(build_request_head(&parsed).is_ok());
    }
}

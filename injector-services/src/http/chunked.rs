//! Hand-rolled chunked transfer-encoding codec used by the forwarder's body
//! phase. Reading is framing-agnostic at the call site: [`BodyCursor`]
//! tracks Content-Length/chunked/close state and [`next_chunk`] always hands
//! back pieces of at most the caller's requested size, splitting an origin's
//! own (possibly larger) chunk boundaries to fit. Writing always re-frames
//! into whatever outgoing discipline the forwarder chose in its head phase.

use http::HeaderMap;
use monoio::buf::IoBufMut;
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt};

use super::message::Framing;
use super::parse::build_header_map;

const INITIAL_BUF: usize = 4096;
const MAX_LINE: usize = 256;
const MAX_TRAILER: usize = 8192;
const MAX_TRAILER_HEADERS: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum ChunkedError {
    #[error("connection closed mid-body")]
    Eof,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed chunk framing")]
    Malformed,
    #[error("chunk-size line exceeded the maximum allowed length")]
    LineTooLong,
}

/// Buffered source over a stream, seeded with whatever body bytes the head
/// parser already read past the head terminator (see `parse::HeadBuffer`).
pub struct BodySource<S> {
    stream: S,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl<S: AsyncReadRent> BodySource<S> {
    pub fn new(stream: S, leftover: &[u8]) -> Self {
        Self {
            stream,
            buf: leftover.to_vec(),
            pos: 0,
            filled: leftover.len(),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn available(&self) -> &[u8] {
        &self.buf[self.pos..self.filled]
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
    }

    async fn read_more(&mut self) -> std::io::Result<bool> {
        if self.pos > 0 && self.filled == self.buf.len() {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
        if self.filled == self.buf.len() {
            let new_len = (self.buf.len() * 2).max(INITIAL_BUF);
            self.buf.resize(new_len, 0);
        }
        let cap = self.buf.len();
        let slice = self.buf.slice_mut(self.filled..cap);
        let (res, slice) = self.stream.read(slice).await;
        self.buf = slice.into_inner();
        let n = res?;
        self.filled += n;
        Ok(n > 0)
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, ChunkedError> {
        loop {
            if let Some(idx) = self.available().windows(2).position(|w| w == b"\r\n") {
                let line = self.buf[self.pos..self.pos + idx].to_vec();
                self.consume(idx + 2);
                return Ok(line);
            }
            if self.filled - self.pos > MAX_LINE {
                return Err(ChunkedError::LineTooLong);
            }
            if !self.read_more().await? {
                return Err(ChunkedError::Eof);
            }
        }
    }

    async fn read_exact_into_vec(&mut self, want: usize) -> Result<Vec<u8>, ChunkedError> {
        while self.filled - self.pos < want {
            if !self.read_more().await? {
                return Err(ChunkedError::Eof);
            }
        }
        let out = self.buf[self.pos..self.pos + want].to_vec();
        self.consume(want);
        Ok(out)
    }

    /// At least one, up to `max`, bytes. Empty only on EOF.
    async fn read_some_up_to(&mut self, max: usize) -> Result<Vec<u8>, ChunkedError> {
        if self.pos == self.filled && !self.read_more().await? {
            return Ok(Vec::new());
        }
        let take = max.min(self.filled - self.pos);
        let out = self.buf[self.pos..self.pos + take].to_vec();
        self.consume(take);
        Ok(out)
    }

    /// Reads trailer header fields up to and including the terminating blank
    /// line, growing the buffer the same way the head parser does.
    pub async fn read_trailer(&mut self) -> Result<HeaderMap, ChunkedError> {
        loop {
            let mut storage = [httparse::EMPTY_HEADER; MAX_TRAILER_HEADERS];
            match httparse::parse_headers(self.available(), &mut storage) {
                Ok(httparse::Status::Complete((used, headers))) => {
                    let map = build_header_map(headers).map_err(|_| ChunkedError::Malformed)?;
                    self.consume(used);
                    return Ok(map);
                }
                Ok(httparse::Status::Partial) => {}
                Err(_) => return Err(ChunkedError::Malformed),
            }
            if self.filled - self.pos > MAX_TRAILER {
                return Err(ChunkedError::LineTooLong);
            }
            if !self.read_more().await? {
                return Err(ChunkedError::Eof);
            }
        }
    }
}

/// Tracks how much of the current incoming framing discipline remains.
pub enum BodyCursor {
    Length { remaining: u64 },
    Chunked { remaining_in_chunk: u64, done: bool },
    Close { done: bool },
}

impl BodyCursor {
    pub fn new(framing: Framing) -> Self {
        match framing {
            Framing::Length(n) => BodyCursor::Length { remaining: n },
            Framing::Chunked => BodyCursor::Chunked {
                remaining_in_chunk: 0,
                done: false,
            },
            Framing::Close => BodyCursor::Close { done: false },
        }
    }
}

/// Reads the next body piece, at most `max` bytes. `Ok(None)` marks the end
/// of the body (declared length reached, final chunk seen, or EOF on a
/// close-delimited body) — the caller must still call
/// [`BodySource::read_trailer`] itself when the incoming framing was chunked.
pub async fn next_chunk<S: AsyncReadRent>(
    source: &mut BodySource<S>,
    cursor: &mut BodyCursor,
    max: usize,
) -> Result<Option<Vec<u8>>, ChunkedError> {
    match cursor {
        BodyCursor::Length { remaining } => {
            if *remaining == 0 {
                return Ok(None);
            }
            let take = (*remaining).min(max as u64) as usize;
            let data = source.read_exact_into_vec(take).await?;
            *remaining -= data.len() as u64;
            Ok(Some(data))
        }
        BodyCursor::Close { done } => {
            if *done {
                return Ok(None);
            }
            let data = source.read_some_up_to(max).await?;
            if data.is_empty() {
                *done = true;
                return Ok(None);
            }
            Ok(Some(data))
        }
        BodyCursor::Chunked {
            remaining_in_chunk,
            done,
        } => {
            if *done {
                return Ok(None);
            }
            if *remaining_in_chunk == 0 {
                let line = source.read_line().await?;
                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    *done = true;
                    return Ok(None);
                }
                *remaining_in_chunk = size;
            }
            let take = (*remaining_in_chunk).min(max as u64) as usize;
            let data = source.read_exact_into_vec(take).await?;
            *remaining_in_chunk -= data.len() as u64;
            if *remaining_in_chunk == 0 {
                let crlf = source.read_exact_into_vec(2).await?;
                if crlf != b"\r\n" {
                    return Err(ChunkedError::Malformed);
                }
            }
            Ok(Some(data))
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ChunkedError> {
    let line = std::str::from_utf8(line).map_err(|_| ChunkedError::Malformed)?;
    let size_str = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size_str, 16).map_err(|_| ChunkedError::Malformed)
}

fn frame_chunk(data: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(data.len() + 16);
    framed.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    framed.extend_from_slice(data);
    framed.extend_from_slice(b"\r\n");
    framed
}

fn frame_final_chunk(trailer: &HeaderMap) -> Vec<u8> {
    let mut framed = Vec::with_capacity(32);
    framed.extend_from_slice(b"0\r\n");
    for (name, value) in trailer.iter() {
        framed.extend_from_slice(name.as_str().as_bytes());
        framed.extend_from_slice(b": ");
        framed.extend_from_slice(value.as_bytes());
        framed.extend_from_slice(b"\r\n");
    }
    framed.extend_from_slice(b"\r\n");
    framed
}

pub async fn write_length_chunk<S: AsyncWriteRent>(stream: &mut S, data: Vec<u8>) -> std::io::Result<()> {
    let (res, _buf) = stream.write_all(data).await;
    res
}

pub async fn write_chunked_chunk<S: AsyncWriteRent>(stream: &mut S, data: Vec<u8>) -> std::io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let (res, _buf) = stream.write_all(frame_chunk(&data)).await;
    res
}

pub async fn write_final_chunk<S: AsyncWriteRent>(
    stream: &mut S,
    trailer: &HeaderMap,
) -> std::io::Result<()> {
    let (res, _buf) = stream.write_all(frame_final_chunk(trailer)).await;
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue};

    #[test]
    fn parses_plain_hex_chunk_size() {
        assert_eq!(parse_chunk_size(b"1a").unwrap(), 0x1a);
    }

    #[test]
    fn parses_chunk_size_with_extension() {
        assert_eq!(parse_chunk_size(b"ff;foo=bar").unwrap(), 0xff);
    }

    #[test]
    fn rejects_non_hex_chunk_size() {
        assert!(parse_chunk_size(b"xyz").is_err());
    }

    #[test]
    fn frames_chunk_with_size_line_and_terminator() {
        let framed = frame_chunk(b"hello");
        assert_eq!(framed, b"5\r\nhello\r\n");
    }

    #[test]
    fn frames_empty_chunk_has_zero_size_line() {
        let framed = frame_chunk(b"");
        assert_eq!(framed, b"0\r\n\r\n");
    }

    #[test]
    fn frames_final_chunk_with_trailer_fields() {
        let mut trailer = HeaderMap::new();
        trailer.insert(
            HeaderName::from_static("digest"),
            HeaderValue::from_static("SHA-256=abc"),
        );
        let framed = frame_final_chunk(&trailer);
        assert_eq!(framed, b"0\r\ndigest: SHA-256=abc\r\n\r\n");
    }
}

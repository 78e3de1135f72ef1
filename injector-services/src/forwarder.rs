//! Byte-accurate splice of a response from an origin connection to a client
//! connection, per the three-phase (head/body/trailer) contract. Request
//! serialization is a separate, smaller concern (`write_request_head`) since
//! only the response side needs the transform hooks.

use http::{HeaderMap, Method};
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt};

use crate::common::CancelToken;
use crate::http::chunked::{self, BodyCursor, BodySource};
use crate::http::message::declared_framing;
use crate::http::parse::{self, ParseError};
use crate::http::{Framing, RequestHead, ResponseHead};

const MAX_HEAD: usize = 64 * 1024;
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("reading response head: {0}")]
    Head(#[from] ParseError),
    #[error("streaming body: {0}")]
    Body(#[from] chunked::ChunkedError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

/// Writes a request head (status line, headers, blank line) to `sink`.
/// Callers forward any request body themselves afterwards using the same
/// [`BodyCursor`]/[`chunked`] primitives the response phase uses.
pub async fn write_request_head<S: AsyncWriteRent>(sink: &mut S, head: &RequestHead) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(head.method.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(head.raw_target.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");
    write_headers(&mut buf, &head.headers);
    let (res, _buf) = sink.write_all(buf).await;
    res
}

/// Writes a response head (status line, headers, blank line) to `sink`.
pub async fn write_response_head<S: AsyncWriteRent>(sink: &mut S, head: &ResponseHead) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(format!("HTTP/1.1 {}\r\n", head.status).as_bytes());
    write_headers(&mut buf, &head.headers);
    let (res, _buf) = sink.write_all(buf).await;
    res
}

fn write_headers(buf: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
}

/// Reads the response head from `origin`, commits an outgoing framing
/// discipline from whatever `head_xform` returns, and streams the body and
/// (if the outgoing framing is chunked) trailer to `client`. Returns the
/// head actually written, so the caller can fold its `Connection` field into
/// the overall keep-alive decision.
pub async fn forward_response<Origin, Client>(
    mut origin: Origin,
    client: &mut Client,
    request_method: &Method,
    head_xform: impl FnOnce(ResponseHead) -> ResponseHead,
    data_xform: impl FnMut(Vec<u8>) -> Vec<u8>,
    trailer_xform: impl FnOnce(HeaderMap) -> HeaderMap,
    cancel: &CancelToken,
) -> Result<(ResponseHead, Origin), ForwardError>
where
    Origin: AsyncReadRent,
    Client: AsyncWriteRent,
{
    let (head_in, head_buf) = parse::read_response_head(&mut origin, MAX_HEAD)
        .await
        .map_err(ForwardError::Head)?;
    let mut source = BodySource::new(origin, head_buf.leftover());

    if cancel.is_fired() {
        return Err(ForwardError::Cancelled);
    }

    let in_framing = head_in.incoming_framing(request_method);
    let head_out = head_xform(head_in);
    let out_framing = declared_framing(&head_out.headers);

    write_response_head(client, &head_out).await?;
    stream_body(&mut source, in_framing, out_framing, client, data_xform, trailer_xform, cancel).await?;

    Ok((head_out, source.into_inner()))
}

/// Streams a request body from `client` to `origin`, using the framing the
/// (already-written) outgoing request head declared. Returns `client` so the
/// caller can keep reading further pipelined requests off the same
/// connection. A no-op loop (zero iterations) when `in_framing` is
/// `Length(0)`, the common case for bodyless methods.
pub async fn forward_request_body<Client, Origin>(
    client: Client,
    leftover: &[u8],
    in_framing: Framing,
    out_framing: Framing,
    origin: &mut Origin,
    cancel: &CancelToken,
) -> Result<Client, ForwardError>
where
    Client: AsyncReadRent,
    Origin: AsyncWriteRent,
{
    let mut source = BodySource::new(client, leftover);
    stream_body(&mut source, in_framing, out_framing, origin, |chunk| chunk, |trailer| trailer, cancel).await?;
    Ok(source.into_inner())
}

/// Shared Phase 2/3 loop: read chunks under `in_framing` until end-of-body,
/// transforming and re-framing each one under `out_framing`; if the outgoing
/// framing is chunked, finish with a transformed trailer.
async fn stream_body<In, Out>(
    source: &mut BodySource<In>,
    in_framing: Framing,
    out_framing: Framing,
    sink: &mut Out,
    mut data_xform: impl FnMut(Vec<u8>) -> Vec<u8>,
    trailer_xform: impl FnOnce(HeaderMap) -> HeaderMap,
    cancel: &CancelToken,
) -> Result<(), ForwardError>
where
    In: AsyncReadRent,
    Out: AsyncWriteRent,
{
    let mut cursor = BodyCursor::new(in_framing);
    loop {
        if cancel.is_fired() {
            return Err(ForwardError::Cancelled);
        }
        match chunked::next_chunk(source, &mut cursor, CHUNK_SIZE).await? {
            Some(chunk) => {
                let chunk = data_xform(chunk);
                write_out_chunk(sink, out_framing, chunk).await?;
            }
            None => break,
        }
    }

    if out_framing == Framing::Chunked {
        let trailer_in = if in_framing == Framing::Chunked {
            source.read_trailer().await?
        } else {
            HeaderMap::new()
        };
        let trailer_out = trailer_xform(trailer_in);
        chunked::write_final_chunk(sink, &trailer_out).await?;
    }
    Ok(())
}

async fn write_out_chunk<Sink: AsyncWriteRent>(
    sink: &mut Sink,
    framing: Framing,
    chunk: Vec<u8>,
) -> std::io::Result<()> {
    match framing {
        Framing::Chunked => chunked::write_chunked_chunk(sink, chunk).await,
        Framing::Length(_) | Framing::Close => chunked::write_length_chunk(sink, chunk).await,
    }
}


//! CONNECT tunnel handler (§4.F.1): dials the target with no TLS from the
//! injector's own side (it is a transparent tunnel, not a TLS-terminating
//! proxy), replies `200 OK`, then splices bytes in both directions until
//! either side closes or the handler's cancel token fires.

use std::sync::Arc;

use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, Split};
use rustls::RootCertStore;

use crate::common::CancelToken;
use crate::dialer::{self, DialError, DialTarget};
use crate::http::RequestHead;

const COPY_BUF: usize = 16 * 1024;

/// Runs the CONNECT tunnel to completion. On a dial failure this writes the
/// client-visible response itself (`400` for an unresolvable or blocked
/// target, `502` for a connect/TLS failure, nothing for a cancellation) before
/// returning `Err`, since the caller has no way to reach the client stream
/// once it's been moved in here.
pub async fn handle_connect<Client>(
    request: &RequestHead,
    mut client: Client,
    roots: Arc<RootCertStore>,
    cancel: &CancelToken,
) -> Result<(), DialError>
where
    Client: Split + AsyncReadRent + AsyncWriteRent,
{
    let dialed = match (request.host(), request.port()) {
        (Some(host), Some(port)) => {
            let target = DialTarget {
                host,
                port,
                tls: false,
                is_connect: true,
            };
            dialer::dial(target, roots, cancel).await
        }
        _ => Err(DialError::Resolve),
    };
    let origin = match dialed {
        Ok(origin) => origin,
        Err(err) => {
            if let Some(status_line) = status_line_for(&err) {
                let _ = write_plaintext(&mut client, status_line, &err.to_string()).await;
            }
            return Err(err);
        }
    };

    let (res, _buf) = client.write_all(b"HTTP/1.1 200 OK\r\n\r\n".to_vec()).await;
    res.map_err(DialError::TlsHandshake)?;

    splice(client, origin, cancel).await;
    Ok(())
}

/// Status line for a dial failure, per the error-kind table: `Resolve`/
/// `Blocked` are client-target problems (`400`), `ConnectTimeout`/
/// `TlsHandshake` are origin problems (`502`), `Cancelled` gets no response
/// at all (shutdown in progress, socket is about to close regardless).
fn status_line_for(err: &DialError) -> Option<&'static str> {
    match err {
        DialError::Resolve | DialError::Blocked => Some("HTTP/1.1 400 Bad Request"),
        DialError::ConnectTimeout | DialError::TlsHandshake(_) => Some("HTTP/1.1 502 Bad Gateway"),
        DialError::Cancelled => None,
    }
}

async fn write_plaintext<Client: AsyncWriteRent>(
    client: &mut Client,
    status_line: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "{status_line}\r\ncontent-length: {}\r\ncontent-type: text/plain\r\n\r\n{body}",
        body.len()
    );
    let (res, _buf) = client.write_all(response.into_bytes()).await;
    res
}

/// The dialer never opens a TLS connection for CONNECT targets (it is a
/// transparent tunnel), so the origin side is always a plain stream and
/// splits the same way the client side does.
async fn splice<Client, Origin>(client: Client, origin: Origin, cancel: &CancelToken)
where
    Client: Split + AsyncReadRent + AsyncWriteRent,
    Origin: Split + AsyncReadRent + AsyncWriteRent,
{
    let (mut client_r, mut client_w) = client.into_split();
    let (mut origin_r, mut origin_w) = origin.into_split();

    let client_to_origin = copy(&mut client_r, &mut origin_w);
    let origin_to_client = copy(&mut origin_r, &mut client_w);

    monoio::select! {
        _ = cancel.cancelled() => {}
        _ = client_to_origin => {}
        _ = origin_to_client => {}
    }
}

async fn copy<R: AsyncReadRent, W: AsyncWriteRent>(reader: &mut R, writer: &mut W) {
    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let (res, b) = reader.read(buf).await;
        buf = b;
        match res {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let (res, b) = writer.write_all(buf).await;
        buf = b;
        if res.is_err() {
            return;
        }
    }
}

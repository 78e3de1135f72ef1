//! Per-connection server loop (§4.F): reads one request head at a time off
//! the client connection, classifies it, dispatches to the CONNECT tunnel,
//! the internal API, or the remote-request path (plain-proxy or injection
//! mode), and decides whether to read another request off the same
//! connection.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, Split};
use rustls::RootCertStore;
use uuid::Uuid;

use injector_core::config::InjectorConfig;
use injector_core::signing::InjectorKey;

use crate::auth;
use crate::common::CancelToken;
use crate::connect;
use crate::dialer::{self, DialError, DialTarget};
use crate::forwarder;
use crate::http::{parse, RequestHead, ResponseHead};
use crate::injection::{self, InjectionContext};
use crate::pool::{ConnPool, PoolKey};
use crate::version::{self, VersionOutcome};

const MAX_HEAD: usize = 64 * 1024;

/// Runs request after request over one accepted client connection until the
/// client disconnects, a handler ends the connection outright (CONNECT), or
/// the three-way keep-alive decision comes back negative.
pub async fn serve_connection<S>(
    client: S,
    config: Rc<InjectorConfig>,
    key: InjectorKey,
    pool: ConnPool,
    roots: Arc<RootCertStore>,
    cancel: CancelToken,
) where
    S: Split + AsyncReadRent + AsyncWriteRent,
{
    let mut client = client;
    loop {
        if cancel.is_fired() {
            return;
        }

        let (request, head_buf) = match parse::read_request_head(&mut client, MAX_HEAD).await {
            Ok(pair) => pair,
            Err(_) => return,
        };

        if request.version != Version::HTTP_11 {
            let _ = respond_status(&mut client, StatusCode::BAD_REQUEST, &[], "HTTP/1.0 is not supported").await;
            return;
        }

        if request.is_connect() {
            if let Err(err) = connect::handle_connect(&request, client, roots, &cancel).await {
                tracing::debug!(?err, "CONNECT failed");
            }
            return;
        }

        if is_internal_api(&request) {
            client = match respond_internal_api(client, &request).await {
                Ok((stream, keep_alive)) if keep_alive => stream,
                Ok(_) | Err(_) => return,
            };
            continue;
        }

        if !auth::is_authorized(&request, &config.credentials) {
            client = match respond_unauthorized(client, &request).await {
                Ok((stream, keep_alive)) if keep_alive => stream,
                Ok(_) | Err(_) => return,
            };
            continue;
        }

        let outcome = handle_remote_request(
            client,
            &request,
            head_buf.leftover(),
            &key,
            &pool,
            roots.clone(),
            &cancel,
        )
        .await;
        client = match outcome {
            Ok((stream, keep_alive)) if keep_alive => stream,
            Ok(_) => return,
            Err(err) => {
                tracing::debug!(?err, "remote request failed");
                return;
            }
        };
    }
}

fn is_internal_api(request: &RequestHead) -> bool {
    request.raw_target.starts_with('/') || request.method == Method::OPTIONS
}

async fn respond_internal_api<S: AsyncWriteRent>(
    mut client: S,
    request: &RequestHead,
) -> Result<(S, bool), std::io::Error> {
    let response = if request.method == Method::GET && request.raw_target == "/api/ok" {
        respond_status(&mut client, StatusCode::OK, &[("content-type", "text/html")], "").await?
    } else {
        respond_status(&mut client, StatusCode::BAD_REQUEST, &[], "").await?
    };
    Ok((client, request.keep_alive() && response.keep_alive()))
}

async fn respond_unauthorized<S: AsyncWriteRent>(
    mut client: S,
    request: &RequestHead,
) -> Result<(S, bool), std::io::Error> {
    let response = respond_status(
        &mut client,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        &[("proxy-authenticate", "Basic realm=\"injector\"")],
        "",
    )
    .await?;
    Ok((client, request.keep_alive() && response.keep_alive()))
}

/// Writes a status-line-only (or plaintext-body) response. `body` is written
/// verbatim with a matching `Content-Length`; callers pass `""` for bodies
/// that are genuinely empty (e.g. `200 OK` on `/api/ok`).
async fn respond_status<S: AsyncWriteRent>(
    client: &mut S,
    status: StatusCode,
    extra: &[(&str, &str)],
    body: &str,
) -> Result<ResponseHead, std::io::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_LENGTH,
        HeaderValue::from_str(&body.len().to_string()).expect("digit string is a valid header value"),
    );
    if !body.is_empty() {
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    }
    for (name, value) in extra {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).expect("static header name is valid"),
            HeaderValue::from_str(value).expect("static header value is valid"),
        );
    }
    let head = ResponseHead {
        status,
        version: Version::HTTP_11,
        headers,
    };
    forwarder::write_response_head(client, &head).await?;
    if !body.is_empty() {
        let (res, _buf) = client.write_all(body.as_bytes().to_vec()).await;
        res?;
    }
    Ok(head)
}

#[derive(thiserror::Error, Debug)]
enum RemoteError {
    #[error("missing host/port in request target")]
    NoTarget,
    #[error("writing to client: {0}")]
    Client(#[from] std::io::Error),
    #[error("writing to origin: {0}")]
    Forward(#[from] forwarder::ForwardError),
}

/// Handles a remote (proxied) request: plain-proxy if no `X-Ouinet-Version`
/// header, injection mode if it matches the supported version, a `400` on
/// mismatch. Returns the client stream and the three-way keep-alive
/// decision.
async fn handle_remote_request<S>(
    mut client: S,
    request: &RequestHead,
    leftover: &[u8],
    key: &InjectorKey,
    pool: &ConnPool,
    roots: Arc<RootCertStore>,
    cancel: &CancelToken,
) -> Result<(S, bool), RemoteError>
where
    S: AsyncReadRent + AsyncWriteRent,
{
    let outcome = version::negotiate(request);
    if let Some(discriminator) = outcome.discriminator() {
        let response = respond_status(
            &mut client,
            StatusCode::BAD_REQUEST,
            &[("x-ouinet-http-status", discriminator)],
            "",
        )
        .await
        .map_err(RemoteError::Client)?;
        return Ok((client, request.keep_alive() && response.keep_alive()));
    }

    let Some(host) = request.host() else {
        let response = respond_status(&mut client, StatusCode::BAD_REQUEST, &[], "missing Host")
            .await
            .map_err(RemoteError::Client)?;
        return Ok((client, request.keep_alive() && response.keep_alive()));
    };
    let Some(port) = request.port() else {
        return Err(RemoteError::NoTarget);
    };
    let scheme: &'static str = if request.scheme() == "https" { "https" } else { "http" };
    let pool_key = PoolKey::new(scheme, host, port);

    let mut origin = match pool.get(&pool_key) {
        Some(pooled) => pooled.stream,
        None => {
            let target = DialTarget {
                host,
                port,
                tls: scheme == "https",
                is_connect: false,
            };
            match dialer::dial(target, roots.clone(), cancel).await {
                Ok(stream) => stream,
                Err(DialError::Cancelled) => {
                    tracing::debug!(host, port, "origin dial cancelled");
                    return Ok((client, false));
                }
                Err(err) => {
                    tracing::debug!(?err, host, port, "origin dial failed");
                    let status = match &err {
                        DialError::Resolve | DialError::Blocked => StatusCode::BAD_REQUEST,
                        DialError::ConnectTimeout | DialError::TlsHandshake(_) => StatusCode::BAD_GATEWAY,
                        DialError::Cancelled => unreachable!("handled above"),
                    };
                    let response = respond_status(&mut client, status, &[], &err.to_string())
                        .await
                        .map_err(RemoteError::Client)?;
                    return Ok((client, request.keep_alive() && response.keep_alive()));
                }
            }
        }
    };

    let injecting = matches!(outcome, VersionOutcome::Supported);

    let mut outgoing = request.clone();
    if injecting {
        injection::strip_ouinet_fields(&mut outgoing.headers);
    }
    let in_request_framing = outgoing.request_framing();
    forwarder::write_request_head(&mut origin, &outgoing).await?;
    let out_request_framing = in_request_framing;
    let client_after_body = forwarder::forward_request_body(
        client,
        leftover,
        in_request_framing,
        out_request_framing,
        &mut origin,
        cancel,
    )
    .await?;
    client = client_after_body;

    let ctx_slot: Rc<RefCell<Option<InjectionContext>>> = Rc::new(RefCell::new(None));
    // Stripping hop-by-hop fields (including `Connection`) from `head_out`
    // loses the origin's own keep-alive signal, so it's captured here, off
    // `head_in`, before the transform runs.
    let origin_keep_alive_slot: Rc<std::cell::Cell<bool>> = Rc::new(std::cell::Cell::new(true));
    let normalized_uri = request.raw_target.clone();
    let unix_now = unix_timestamp();
    let insert_id = Uuid::new_v4();
    let key_for_head = key.clone();

    let ctx_for_head = ctx_slot.clone();
    let origin_keep_alive_for_head = origin_keep_alive_slot.clone();
    let head_xform = move |head: ResponseHead| {
        origin_keep_alive_for_head.set(head.keep_alive());
        if injecting {
            let (head_out, ctx) = InjectionContext::start(key_for_head, head, &normalized_uri, unix_now, insert_id);
            *ctx_for_head.borrow_mut() = Some(ctx);
            head_out
        } else {
            let mut head = head;
            injection::strip_ouinet_fields(&mut head.headers);
            head
        }
    };

    let ctx_for_data = ctx_slot.clone();
    let data_xform = move |chunk: Vec<u8>| {
        if let Some(ctx) = ctx_for_data.borrow_mut().as_mut() {
            ctx.update_hash(&chunk);
        }
        chunk
    };

    let ctx_for_trailer = ctx_slot.clone();
    let trailer_xform = move |trailer_in: HeaderMap| {
        if injecting {
            match ctx_for_trailer.borrow_mut().take() {
                Some(ctx) => ctx.finish(),
                None => trailer_in,
            }
        } else {
            trailer_in
        }
    };

    let (_head_out, origin) = forwarder::forward_response(
        origin,
        &mut client,
        &request.method,
        head_xform,
        data_xform,
        trailer_xform,
        cancel,
    )
    .await?;

    let keep_alive = request.keep_alive() && origin_keep_alive_slot.get();
    pool.put(pool_key, crate::pool::PooledConn { stream: origin }, keep_alive);

    Ok((client, keep_alive))
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Version;

    fn request(method: Method, target: &str) -> RequestHead {
        RequestHead {
            method,
            raw_target: target.to_string(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn origin_form_path_is_internal_api() {
        assert!(is_internal_api(&request(Method::GET, "/api/ok")));
    }

    #[test]
    fn options_method_is_internal_api() {
        assert!(is_internal_api(&request(Method::OPTIONS, "http://example/")));
    }

    #[test]
    fn absolute_form_get_is_not_internal_api() {
        assert!(!is_internal_api(&request(Method::GET, "http://example/")));
    }
}

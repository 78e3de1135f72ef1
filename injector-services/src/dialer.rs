//! Dials an origin server on behalf of a remote request or CONNECT tunnel:
//! resolves and validates the target, connects with a bounded timeout, and
//! (for `https`) performs the TLS client handshake.

use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use monoio::net::TcpStream;
use monoio_rustls::TlsConnector;
use rustls::{ClientConfig, RootCertStore};

use crate::common::{with_timeout, CancelToken, TimeoutError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_ALLOWED_PORTS: [u16; 4] = [80, 443, 8080, 8443];

#[derive(thiserror::Error, Debug)]
pub enum DialError {
    #[error("could not resolve host")]
    Resolve,
    #[error("target is blocked (loopback or disallowed port)")]
    Blocked,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

pub enum OriginStream {
    Plain(TcpStream),
    Tls(Box<monoio_rustls::ClientTlsStream<TcpStream>>),
}

// Both variants only ever move their read and write halves independently
// (neither keeps cross-half state a concurrent split would corrupt), so
// splitting is safe the same way it is for `AcceptedStream`.
unsafe impl monoio::io::Split for OriginStream {}

impl monoio::io::AsyncReadRent for OriginStream {
    async fn read<T: monoio::buf::IoBufMut>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            OriginStream::Plain(s) => s.read(buf).await,
            OriginStream::Tls(s) => s.read(buf).await,
        }
    }

    async fn readv<T: monoio::buf::IoVecBufMut>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            OriginStream::Plain(s) => s.readv(buf).await,
            OriginStream::Tls(s) => s.readv(buf).await,
        }
    }
}

impl monoio::io::AsyncWriteRent for OriginStream {
    async fn write<T: monoio::buf::IoBuf>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            OriginStream::Plain(s) => s.write(buf).await,
            OriginStream::Tls(s) => s.write(buf).await,
        }
    }

    async fn writev<T: monoio::buf::IoVecBuf>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            OriginStream::Plain(s) => s.writev(buf).await,
            OriginStream::Tls(s) => s.writev(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OriginStream::Plain(s) => s.flush().await,
            OriginStream::Tls(s) => s.flush().await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            OriginStream::Plain(s) => s.shutdown().await,
            OriginStream::Tls(s) => s.shutdown().await,
        }
    }
}

/// Resolved dial target: host/port already validated against the loopback
/// and (for CONNECT) port-allowlist policies.
pub struct DialTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub tls: bool,
    pub is_connect: bool,
}

pub async fn dial(target: DialTarget<'_>, roots: Arc<RootCertStore>, cancel: &CancelToken) -> Result<OriginStream, DialError> {
    if is_loopback_host(target.host) {
        return Err(DialError::Blocked);
    }
    if target.is_connect && !CONNECT_ALLOWED_PORTS.contains(&target.port) {
        return Err(DialError::Blocked);
    }

    let addrs = resolve(target.host, target.port)?;
    let addr = addrs
        .into_iter()
        .find(|a| !a.ip().is_loopback())
        .ok_or(DialError::Blocked)?;

    if cancel.is_fired() {
        return Err(DialError::Cancelled);
    }

    let tcp = match with_timeout(CONNECT_TIMEOUT, connect(addr)).await {
        Ok(stream) => stream,
        Err(TimeoutError::Timeout) => return Err(DialError::ConnectTimeout),
        Err(TimeoutError::Inner(e)) => return Err(DialError::TlsHandshake(e)),
    };
    tcp.set_nodelay(true).ok();

    if cancel.is_fired() {
        return Err(DialError::Cancelled);
    }

    if !target.tls {
        return Ok(OriginStream::Plain(tcp));
    }

    let config = Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates((*roots).clone())
            .with_no_client_auth(),
    );
    let connector = TlsConnector::from(config);
    let server_name = target
        .host
        .to_string()
        .try_into()
        .map_err(|_| DialError::TlsHandshake(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid SNI host")))?;

    let tls = with_timeout(TLS_HANDSHAKE_TIMEOUT, async {
        connector.connect(server_name, tcp).await
    })
    .await
    .map_err(|e| match e {
        TimeoutError::Timeout => {
            DialError::TlsHandshake(std::io::Error::new(std::io::ErrorKind::TimedOut, "TLS handshake timed out"))
        }
        TimeoutError::Inner(inner) => DialError::TlsHandshake(inner),
    })?;

    Ok(OriginStream::Tls(Box::new(tls)))
}

async fn connect(addr: SocketAddr) -> std::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, DialError> {
    (host, port)
        .to_socket_addrs()
        .map(|it| it.collect())
        .map_err(|_| DialError::Resolve)
}

/// Loopback literals, including the IPv6 forms a bracketed authority can
/// carry (`::1`, and IPv4-mapped `::ffff:127.0.0.0/8`).
fn is_loopback_host(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || is_ipv4_mapped_loopback(v6),
        Err(_) => bare.eq_ignore_ascii_case("localhost"),
    }
}

fn is_ipv4_mapped_loopback(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ipv4_loopback() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.5.0.9"));
    }

    #[test]
    fn rejects_ipv6_loopback() {
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("[::1]"));
    }

    #[test]
    fn rejects_ipv4_mapped_ipv6_loopback() {
        assert!(is_loopback_host("::ffff:127.0.0.1"));
    }

    #[test]
    fn accepts_public_host() {
        assert!(!is_loopback_host("example.com"));
        assert!(!is_loopback_host("93.184.216.34"));
    }

    #[test]
    fn connect_allowed_ports_match_spec() {
        assert_eq!(CONNECT_ALLOWED_PORTS, [80, 443, 8080, 8443]);
    }
}

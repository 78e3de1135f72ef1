//! Listener abstraction the accept loop drives.
//!
//! Only a plain TCP transport is implemented. The other transports named in
//! the injector's external-interface surface (TCP+TLS, uTP[+TLS],
//! obfs2/3/4, lampshade, I2P, BEP5) are out of scope for this build; a
//! config that asks for one fails validation instead of silently being
//! ignored (see `injector-core::config::InjectorConfig::validate`).

use std::io;
use std::net::SocketAddr;

use monoio::net::{TcpListener, TcpStream};

use crate::context::PeerAddr;

/// A listener that yields accepted streams paired with the peer's address.
pub trait Transport {
    type Stream;

    fn accept(
        &self,
    ) -> impl std::future::Future<Output = io::Result<(Self::Stream, PeerAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
        })
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, PeerAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true).ok();
        Ok((stream, PeerAddr(addr)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

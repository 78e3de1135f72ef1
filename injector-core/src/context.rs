//! Per-connection identity carried alongside a request through the pipeline.

use std::net::SocketAddr;

use derive_more::{From, Into};

/// Monotonically increasing identifier assigned to each accepted connection,
/// used only for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct ConnId(pub u64);

/// Address of the client that dialed this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, From, Into)]
pub struct PeerAddr(pub SocketAddr);

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Default)]
pub struct ConnIdGen {
    next: std::cell::Cell<u64>,
}

impl ConnIdGen {
    pub fn next(&self) -> ConnId {
        let id = self.next.get();
        self.next.set(id.wrapping_add(1));
        ConnId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_ids_increase() {
        let gen = ConnIdGen::default();
        let a = gen.next();
        let b = gen.next();
        assert!(b.0 > a.0);
    }
}

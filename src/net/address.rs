//! Listening address value type.
//!
//! Dedup in the listener registry compares addresses structurally, so the
//! address is a plain value: a TCP endpoint or a Unix socket path. Two
//! `listen` directives resolving to the same value share one socket.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// The address a listener is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenAddress {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ListenAddress {
    pub fn is_unix(&self) -> bool {
        matches!(self, ListenAddress::Unix(_))
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddress::Tcp(addr) => write!(f, "{}", addr),
            ListenAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl From<SocketAddr> for ListenAddress {
    fn from(addr: SocketAddr) -> Self {
        ListenAddress::Tcp(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn structural_equality() {
        let a = ListenAddress::Tcp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)));
        let b = ListenAddress::Tcp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)));
        let c = ListenAddress::Tcp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)));
        assert_eq!(a, b);
        assert_ne!(a, c);

        // different family, same port: distinct addresses
        let v6 = ListenAddress::Tcp(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8080)));
        assert_ne!(a, v6);

        let u1 = ListenAddress::Unix(PathBuf::from("/tmp/app.sock"));
        let u2 = ListenAddress::Unix(PathBuf::from("/tmp/app.sock"));
        assert_eq!(u1, u2);
        assert_ne!(a, u1);
    }

    #[test]
    fn display_forms() {
        let tcp = ListenAddress::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, 80)));
        assert_eq!(tcp.to_string(), "127.0.0.1:80");
        let unix = ListenAddress::Unix(PathBuf::from("/run/app.sock"));
        assert_eq!(unix.to_string(), "unix:/run/app.sock");
    }
}

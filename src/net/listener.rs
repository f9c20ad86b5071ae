//! Listeners and the listener registry.
//!
//! # Responsibilities
//! - Own the bound, listening sockets produced by `listen` directives
//! - Deduplicate by address: one socket per distinct address, shared across
//!   scopes
//! - Track which virtual hosts each listener serves (fan-out dispatch itself
//!   belongs to the serving subsystem)
//!
//! # Design Decisions
//! - The registry is an ordered `Vec` with linear lookup; listener counts
//!   are small and creation order is the accept-loop binding order
//! - A listener's proxy-protocol flag is fixed at creation; a later
//!   directive wanting the opposite is a load error, not a mutation
//! - `hosts == None` means "inherits the global scope" until exit-scope
//!   resolution rewrites it

use std::os::unix::io::{AsRawFd, RawFd};

use socket2::Socket;

use crate::config::global::HostId;
use crate::net::address::ListenAddress;

/// A bound, listening socket plus the metadata that routes accepted
/// connections to the right virtual hosts.
#[derive(Debug)]
pub struct Listener {
    socket: Socket,
    address: ListenAddress,
    proxy_protocol: bool,
    /// `None` inherits the global host list at scope-exit resolution;
    /// `Some` is an explicit host set grown by each referencing scope.
    hosts: Option<Vec<HostId>>,
}

impl Listener {
    /// A listener created at global scope inherits hosts (`None`); one
    /// created inside a host scope starts with an explicit, initially empty
    /// host set that the creating scope immediately joins.
    pub(crate) fn new(
        socket: Socket,
        address: ListenAddress,
        is_global: bool,
        proxy_protocol: bool,
    ) -> Self {
        Listener {
            socket,
            address,
            proxy_protocol,
            hosts: if is_global { None } else { Some(Vec::new()) },
        }
    }

    /// Raw descriptor handed to the accept-loop subsystem.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn address(&self) -> &ListenAddress {
        &self.address
    }

    pub fn proxy_protocol(&self) -> bool {
        self.proxy_protocol
    }

    /// Resolved host set; `None` until scope-exit resolution runs in a
    /// configuration that defines hosts.
    pub fn hosts(&self) -> Option<&[HostId]> {
        self.hosts.as_deref()
    }

    /// Join `host` to an explicit host set. Listeners inheriting the global
    /// scope are left alone; the exit hook rewrites those.
    pub(crate) fn attach_host(&mut self, host: Option<HostId>) {
        if let (Some(hosts), Some(host)) = (self.hosts.as_mut(), host) {
            hosts.push(host);
        }
    }

    pub(crate) fn resolve_inherited_hosts(&mut self, all_hosts: &[HostId]) {
        if self.hosts.is_none() {
            self.hosts = Some(all_hosts.to_vec());
        }
    }
}

/// The set of unique listening sockets, in creation order.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Vec<Listener>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        ListenerRegistry::default()
    }

    /// Point lookup by address value.
    pub fn find(&self, address: &ListenAddress) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.address() == address)
    }

    /// Point lookup by address value; this is the dedup path.
    pub fn find_mut(&mut self, address: &ListenAddress) -> Option<&mut Listener> {
        self.listeners.iter_mut().find(|l| l.address() == address)
    }

    pub(crate) fn add(&mut self, listener: Listener) -> &mut Listener {
        self.listeners.push(listener);
        // just pushed, so the last slot always exists
        let index = self.listeners.len() - 1;
        &mut self.listeners[index]
    }

    /// Creation-order iteration for accept-loop setup.
    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Listener> {
        self.listeners.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

//! Per-instance global configuration.
//!
//! One `GlobalConfig` exists per server instance: created at init, filled by
//! one or more directive walks, handed to the serving subsystem on success,
//! discarded wholesale on failure (provisioned sockets close on drop).

use std::fmt;

use crate::config::document::ConfigNode;
use crate::config::error::ConfigResult;
use crate::config::knobs::{KnobSnapshot, KnobStore};
use crate::net::listener::{Listener, ListenerRegistry};
use crate::net::socket::SocketCapabilities;

/// Index of a host config within its `GlobalConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub usize);

/// Index of a path config within its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(pub usize);

/// A virtual host declared under the `hosts` directive.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub name: String,
    pub paths: Vec<PathConfig>,
}

impl HostConfig {
    pub fn new(name: impl Into<String>) -> Self {
        HostConfig {
            name: name.into(),
            paths: Vec::new(),
        }
    }
}

/// A path prefix declared under a host's `paths` directive.
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub path: String,
    /// Opaque callback keys collected by `handler` directives; decoding
    /// them is the embedding application's concern.
    pub handlers: Vec<String>,
}

impl PathConfig {
    pub fn new(path: impl Into<String>) -> Self {
        PathConfig {
            path: path.into(),
            handlers: Vec::new(),
        }
    }
}

/// Caller hook receiving `ssl` nodes attached to `listen` directives.
/// Certificate machinery is outside this core; the hook sees the raw node,
/// the listener it applies to, and whether the listener was just created.
pub trait TlsProvisioner {
    fn provision(
        &mut self,
        ssl: &ConfigNode,
        listener: &mut Listener,
        listener_is_new: bool,
    ) -> ConfigResult<()>;
}

/// Caller hook receiving opaque handler keys as `handler` directives fire.
pub trait HandlerRegistrar {
    fn register(&mut self, host: &str, path: &str, key: &str) -> ConfigResult<()>;
}

/// The configuration root owned by one server instance.
pub struct GlobalConfig {
    /// Unique listening sockets, in creation order.
    pub listeners: ListenerRegistry,
    /// Virtual hosts, in declaration order. `HostId` indexes this list.
    pub hosts: Vec<HostConfig>,
    /// Shared runtime knobs; clone the handle into reading subsystems.
    pub knobs: KnobStore,
    /// Error-log path; `None` when unset or configured empty.
    pub error_log: Option<String>,
    /// Socket-option support, probed once at construction.
    pub capabilities: SocketCapabilities,
    pub(crate) tls_provisioner: Option<Box<dyn TlsProvisioner>>,
    pub(crate) handler_registrar: Option<Box<dyn HandlerRegistrar>>,
}

impl GlobalConfig {
    pub fn new() -> Self {
        let capabilities = SocketCapabilities::detect();
        GlobalConfig {
            listeners: ListenerRegistry::new(),
            hosts: Vec::new(),
            knobs: KnobStore::new(capabilities.tcp_fastopen),
            error_log: None,
            capabilities,
            tls_provisioner: None,
            handler_registrar: None,
        }
    }

    /// Install the caller's TLS provisioning hook.
    pub fn set_tls_provisioner(&mut self, provisioner: Box<dyn TlsProvisioner>) {
        self.tls_provisioner = Some(provisioner);
    }

    /// Install the caller's handler-registration hook.
    pub fn set_handler_registrar(&mut self, registrar: Box<dyn HandlerRegistrar>) {
        self.handler_registrar = Some(registrar);
    }

    pub fn host(&self, id: HostId) -> Option<&HostConfig> {
        self.hosts.get(id.0)
    }

    /// Diagnostic snapshot: every knob plus the error-log path.
    pub fn snapshot(&self) -> KnobSnapshot {
        let mut snapshot = self.knobs.snapshot();
        snapshot.error_log = self.error_log.clone();
        snapshot
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig::new()
    }
}

impl fmt::Debug for GlobalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalConfig")
            .field("listeners", &self.listeners)
            .field("hosts", &self.hosts)
            .field("knobs", &self.knobs)
            .field("error_log", &self.error_log)
            .field("capabilities", &self.capabilities)
            .field("tls_provisioner", &self.tls_provisioner.is_some())
            .field("handler_registrar", &self.handler_registrar.is_some())
            .finish()
    }
}

//! Listener provisioning and configuration scope resolution for a
//! multi-protocol (TCP/Unix) server.
//!
//! Given a declarative configuration document, this crate opens and
//! deduplicates the OS listening sockets, applies socket-level tuning, and
//! resolves the global / host / path scope hierarchy that decides which
//! listeners serve which virtual hosts. Accepting connections, protocol
//! handling, and TLS machinery are the embedding application's business;
//! this crate hands it an ordered listener list and a knob snapshot.
//!
//! ```no_run
//! use server_core::{ConfiguratorRegistry, GlobalConfig};
//!
//! # fn main() -> Result<(), server_core::ConfigError> {
//! let document = server_core::from_yaml_str(
//!     "listen: \"8080\"\nnum-threads: 4\n",
//! )?;
//! let mut config = GlobalConfig::new();
//! ConfiguratorRegistry::new().apply(&document, &mut config)?;
//! for listener in config.listeners.iter() {
//!     println!("{} (fd {})", listener.address(), listener.fd());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod net;

pub use config::{
    from_yaml_str, ConfigError, ConfigNode, ConfigResult, Configurator, ConfiguratorRegistry,
    GlobalConfig, HandlerRegistrar, HostConfig, HostId, KnobSnapshot, KnobStore, NodeValue,
    PathConfig, PathId, Scope, ScopeContext, ScopeSet, TlsProvisioner,
};
pub use net::{ListenAddress, Listener, ListenerRegistry, SocketCapabilities};

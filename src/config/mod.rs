//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config bytes (YAML)
//!     → document.rs (generic node tree, line-tagged)
//!     → configurator.rs (scope walk, directive dispatch)
//!     → directives.rs (listen / knobs / handler handlers)
//!     → GlobalConfig (listeners, hosts, knob store)
//!     → handed to the serving subsystem
//! ```
//!
//! # Design Decisions
//! - One load is one synchronous tree walk; callers serialize loads
//! - Loading is not transactional: the first error aborts the walk and the
//!   caller discards the whole config object
//! - The knob store is the only state shared beyond the load, behind one
//!   mutex handle

pub mod configurator;
pub mod directives;
pub mod document;
pub mod error;
pub mod global;
pub mod knobs;

pub use configurator::{Configurator, ConfiguratorRegistry, Scope, ScopeContext, ScopeSet};
pub use document::{from_yaml_str, ConfigNode, NodeValue};
pub use error::{ConfigError, ConfigResult};
pub use global::{
    GlobalConfig, HandlerRegistrar, HostConfig, HostId, PathConfig, PathId, TlsProvisioner,
};
pub use knobs::{KnobSnapshot, KnobStore};

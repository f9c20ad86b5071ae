//! Directive registry and configuration scope walk.
//!
//! # Responsibilities
//! - Hold the table of named directives, each tagged with its legal scopes,
//!   expected node shape, and dispatch phase
//! - Drive the depth-first walk over a document: dispatch by key name,
//!   recurse through `hosts`/`paths` into deeper scopes, invoke per-scope
//!   enter/exit hooks once per scope
//! - Fail the load on the first violation with a line-tagged error
//!
//! # Design Decisions
//! - Three dispatch phases (normal, semi-deferred, deferred) with document
//!   order preserved inside a phase; `hosts`/`paths` are semi-deferred so a
//!   scope's own directives apply before its children, and handler
//!   registration is deferred behind everything else in its scope
//! - The scope context is an explicit value threaded through recursion, not
//!   ambient state
//! - No rollback: whatever earlier directives provisioned stays with the
//!   config object; the caller discards the instance on failure

use std::fmt;

use crate::config::directives;
use crate::config::document::ConfigNode;
use crate::config::error::{ConfigError, ConfigResult};
use crate::config::global::{GlobalConfig, HostConfig, HostId, PathConfig, PathId};

/// Nesting level of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Host,
    Path,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Global => "global",
            Scope::Host => "host",
            Scope::Path => "path",
        })
    }
}

/// Set of scopes a directive is legal in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeSet(u8);

impl ScopeSet {
    pub const GLOBAL: ScopeSet = ScopeSet(1);
    pub const HOST: ScopeSet = ScopeSet(2);
    pub const PATH: ScopeSet = ScopeSet(4);

    pub const fn or(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 | other.0)
    }

    pub fn allows(self, scope: Scope) -> bool {
        let bit = match scope {
            Scope::Global => ScopeSet::GLOBAL.0,
            Scope::Host => ScopeSet::HOST.0,
            Scope::Path => ScopeSet::PATH.0,
        };
        self.0 & bit != 0
    }
}

/// Node shape a directive expects for its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Any,
    Scalar,
    Mapping,
    Sequence,
}

/// When within its scope a directive is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Normal,
    SemiDeferred,
    Deferred,
}

const PHASES: [DispatchPhase; 3] = [
    DispatchPhase::Normal,
    DispatchPhase::SemiDeferred,
    DispatchPhase::Deferred,
];

/// Walk frame: which host/path scope the walk currently sits in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeContext {
    pub host: Option<HostId>,
    pub path: Option<PathId>,
}

impl ScopeContext {
    pub fn scope(&self) -> Scope {
        if self.path.is_some() {
            Scope::Path
        } else if self.host.is_some() {
            Scope::Host
        } else {
            Scope::Global
        }
    }
}

pub type DirectiveHandler =
    Box<dyn Fn(&mut GlobalConfig, &ScopeContext, &ConfigNode) -> ConfigResult<()>>;
pub type ScopeHook =
    Box<dyn Fn(&mut GlobalConfig, &ScopeContext, &ConfigNode) -> ConfigResult<()>>;

struct Directive {
    name: &'static str,
    scopes: ScopeSet,
    shape: Shape,
    phase: DispatchPhase,
    handler: DirectiveHandler,
}

/// A group of directives plus optional per-scope hooks, registered as one
/// unit. Hooks fire once per scope whether or not any of the group's
/// directives occurred in it.
pub struct Configurator {
    commands: Vec<Directive>,
    enter: Option<ScopeHook>,
    exit: Option<ScopeHook>,
}

impl Configurator {
    pub fn new() -> Self {
        Configurator {
            commands: Vec::new(),
            enter: None,
            exit: None,
        }
    }

    pub fn command(
        mut self,
        name: &'static str,
        scopes: ScopeSet,
        shape: Shape,
        phase: DispatchPhase,
        handler: DirectiveHandler,
    ) -> Self {
        self.commands.push(Directive {
            name,
            scopes,
            shape,
            phase,
            handler,
        });
        self
    }

    pub fn on_enter(mut self, hook: ScopeHook) -> Self {
        self.enter = Some(hook);
        self
    }

    pub fn on_exit(mut self, hook: ScopeHook) -> Self {
        self.exit = Some(hook);
        self
    }
}

impl Default for Configurator {
    fn default() -> Self {
        Configurator::new()
    }
}

/// Table of registered configurators driving `apply`.
pub struct ConfiguratorRegistry {
    configurators: Vec<Configurator>,
}

impl ConfiguratorRegistry {
    /// Registry with the core directives (`listen`, the runtime knobs, and
    /// `handler`) installed.
    pub fn new() -> Self {
        let mut registry = ConfiguratorRegistry::empty();
        directives::register_core(&mut registry);
        registry
    }

    /// Bare registry; embedders register everything themselves.
    pub fn empty() -> Self {
        ConfiguratorRegistry {
            configurators: Vec::new(),
        }
    }

    pub fn register(&mut self, configurator: Configurator) {
        self.configurators.push(configurator);
    }

    fn find_command(&self, name: &str) -> Option<&Directive> {
        self.configurators
            .iter()
            .flat_map(|c| c.commands.iter())
            .find(|d| d.name == name)
    }

    /// Apply a configuration document to `config`.
    ///
    /// The first violation aborts the walk; earlier mutations stay with the
    /// config object, which the caller must discard on failure.
    pub fn apply(&self, document: &ConfigNode, config: &mut GlobalConfig) -> ConfigResult<()> {
        if document.as_mapping().is_none() {
            return Err(ConfigError::malformed(
                document.line,
                "configuration document root must be a mapping",
            ));
        }
        self.apply_scope(config, ScopeContext::default(), document)
    }

    fn apply_scope(
        &self,
        config: &mut GlobalConfig,
        ctx: ScopeContext,
        node: &ConfigNode,
    ) -> ConfigResult<()> {
        for configurator in &self.configurators {
            if let Some(hook) = &configurator.enter {
                hook(config, &ctx, node)?;
            }
        }

        // node shape is validated by every caller
        let entries = node.as_mapping().unwrap_or(&[]);
        for phase in PHASES {
            for (key, value) in entries {
                let name = key.as_scalar().ok_or_else(|| {
                    ConfigError::malformed(key.line, "directive name must be a scalar")
                })?;
                match name {
                    "hosts" => {
                        if phase == DispatchPhase::SemiDeferred {
                            self.apply_hosts(config, ctx, key, value)?;
                        }
                    }
                    "paths" => {
                        if phase == DispatchPhase::SemiDeferred {
                            self.apply_paths(config, ctx, key, value)?;
                        }
                    }
                    _ => {
                        let directive = self.find_command(name).ok_or_else(|| {
                            ConfigError::UnknownDirective {
                                line: key.line,
                                name: name.to_string(),
                            }
                        })?;
                        if directive.phase != phase {
                            continue;
                        }
                        if !directive.scopes.allows(ctx.scope()) {
                            return Err(ConfigError::ScopeViolation {
                                line: key.line,
                                name: name.to_string(),
                                scope: ctx.scope(),
                            });
                        }
                        check_shape(name, directive.shape, value)?;
                        (directive.handler)(config, &ctx, value)?;
                    }
                }
            }
        }

        for configurator in &self.configurators {
            if let Some(hook) = &configurator.exit {
                hook(config, &ctx, node)?;
            }
        }
        Ok(())
    }

    fn apply_hosts(
        &self,
        config: &mut GlobalConfig,
        ctx: ScopeContext,
        key: &ConfigNode,
        value: &ConfigNode,
    ) -> ConfigResult<()> {
        if ctx.scope() != Scope::Global {
            return Err(ConfigError::ScopeViolation {
                line: key.line,
                name: "hosts".to_string(),
                scope: ctx.scope(),
            });
        }
        let entries = value
            .as_mapping()
            .ok_or_else(|| ConfigError::malformed(value.line, "`hosts` must be a mapping"))?;
        for (host_key, host_node) in entries {
            let name = host_key.as_scalar().ok_or_else(|| {
                ConfigError::malformed(host_key.line, "host name must be a scalar")
            })?;
            if host_node.as_mapping().is_none() {
                return Err(ConfigError::malformed(
                    host_node.line,
                    format!("configuration for host {} must be a mapping", name),
                ));
            }
            config.hosts.push(HostConfig::new(name));
            let host_id = HostId(config.hosts.len() - 1);
            tracing::debug!(host = name, "entering host scope");
            self.apply_scope(
                config,
                ScopeContext {
                    host: Some(host_id),
                    path: None,
                },
                host_node,
            )?;
        }
        Ok(())
    }

    fn apply_paths(
        &self,
        config: &mut GlobalConfig,
        ctx: ScopeContext,
        key: &ConfigNode,
        value: &ConfigNode,
    ) -> ConfigResult<()> {
        if ctx.scope() != Scope::Host {
            return Err(ConfigError::ScopeViolation {
                line: key.line,
                name: "paths".to_string(),
                scope: ctx.scope(),
            });
        }
        // scope() == Host implies the id is present
        let host_id = ctx.host.ok_or_else(|| {
            ConfigError::malformed(key.line, "`paths` requires an enclosing host")
        })?;
        let entries = value
            .as_mapping()
            .ok_or_else(|| ConfigError::malformed(value.line, "`paths` must be a mapping"))?;
        for (path_key, path_node) in entries {
            let path = path_key.as_scalar().ok_or_else(|| {
                ConfigError::malformed(path_key.line, "path prefix must be a scalar")
            })?;
            if path_node.as_mapping().is_none() {
                return Err(ConfigError::malformed(
                    path_node.line,
                    format!("configuration for path {} must be a mapping", path),
                ));
            }
            let host = &mut config.hosts[host_id.0];
            host.paths.push(PathConfig::new(path));
            let path_id = PathId(host.paths.len() - 1);
            self.apply_scope(
                config,
                ScopeContext {
                    host: Some(host_id),
                    path: Some(path_id),
                },
                path_node,
            )?;
        }
        Ok(())
    }
}

impl Default for ConfiguratorRegistry {
    fn default() -> Self {
        ConfiguratorRegistry::new()
    }
}

fn check_shape(name: &str, shape: Shape, node: &ConfigNode) -> ConfigResult<()> {
    let ok = match shape {
        Shape::Any => true,
        Shape::Scalar => node.as_scalar().is_some(),
        Shape::Mapping => node.as_mapping().is_some(),
        Shape::Sequence => node.as_sequence().is_some(),
    };
    if ok {
        return Ok(());
    }
    let wanted = match shape {
        Shape::Any => "node",
        Shape::Scalar => "scalar",
        Shape::Mapping => "mapping",
        Shape::Sequence => "sequence",
    };
    Err(ConfigError::malformed(
        node.line,
        format!("`{}` must be a {} (found a {})", name, wanted, node.kind()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::document::from_yaml_str;

    fn marker_directive(
        name: &'static str,
        scopes: ScopeSet,
        shape: Shape,
        phase: DispatchPhase,
    ) -> Configurator {
        // records each dispatch by appending to error_log
        Configurator::new().command(
            name,
            scopes,
            shape,
            phase,
            Box::new(move |config, _ctx, _node| {
                let seen = config.error_log.take().unwrap_or_default();
                config.error_log = Some(format!("{}{};", seen, name));
                Ok(())
            }),
        )
    }

    #[test]
    fn root_must_be_a_mapping() {
        let registry = ConfiguratorRegistry::empty();
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("just-a-scalar").unwrap();
        let err = registry.apply(&doc, &mut config).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn unknown_directive_is_rejected_with_line() {
        let registry = ConfiguratorRegistry::empty();
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("nope: 1\n").unwrap();
        match registry.apply(&doc, &mut config).unwrap_err() {
            ConfigError::UnknownDirective { line, name } => {
                assert_eq!(line, 1);
                assert_eq!(name, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn scope_violation_names_the_scope() {
        let mut registry = ConfiguratorRegistry::empty();
        registry.register(marker_directive(
            "host-only",
            ScopeSet::HOST,
            Shape::Any,
            DispatchPhase::Normal,
        ));
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("host-only: 1\n").unwrap();
        match registry.apply(&doc, &mut config).unwrap_err() {
            ConfigError::ScopeViolation { name, scope, .. } => {
                assert_eq!(name, "host-only");
                assert_eq!(scope, Scope::Global);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shape_violation_is_a_malformed_error() {
        let mut registry = ConfiguratorRegistry::empty();
        registry.register(marker_directive(
            "wants-scalar",
            ScopeSet::GLOBAL,
            Shape::Scalar,
            DispatchPhase::Normal,
        ));
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("wants-scalar:\n  nested: 1\n").unwrap();
        let err = registry.apply(&doc, &mut config).unwrap_err();
        assert!(err.to_string().contains("`wants-scalar` must be a scalar"));
    }

    #[test]
    fn deferred_runs_after_normal_regardless_of_document_order() {
        let mut registry = ConfiguratorRegistry::empty();
        registry.register(marker_directive(
            "late",
            ScopeSet::GLOBAL,
            Shape::Any,
            DispatchPhase::Deferred,
        ));
        registry.register(marker_directive(
            "early",
            ScopeSet::GLOBAL,
            Shape::Any,
            DispatchPhase::Normal,
        ));
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("late: 1\nearly: 1\n").unwrap();
        registry.apply(&doc, &mut config).unwrap();
        assert_eq!(config.error_log.as_deref(), Some("early;late;"));
    }

    #[test]
    fn hosts_and_paths_build_the_scope_tree() {
        let mut registry = ConfiguratorRegistry::empty();
        registry.register(marker_directive(
            "leaf",
            ScopeSet::PATH,
            Shape::Any,
            DispatchPhase::Normal,
        ));
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str(
            "hosts:\n  \"a.example\":\n    paths:\n      \"/api\":\n        leaf: 1\n      \"/\": {}\n  \"b.example\": {}\n",
        )
        .unwrap();
        registry.apply(&doc, &mut config).unwrap();

        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].name, "a.example");
        assert_eq!(config.hosts[0].paths.len(), 2);
        assert_eq!(config.hosts[0].paths[0].path, "/api");
        assert_eq!(config.hosts[1].paths.len(), 0);
        assert_eq!(config.error_log.as_deref(), Some("leaf;"));
    }

    #[test]
    fn paths_outside_a_host_scope_is_a_violation() {
        let registry = ConfiguratorRegistry::empty();
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("paths:\n  \"/\": {}\n").unwrap();
        assert!(matches!(
            registry.apply(&doc, &mut config).unwrap_err(),
            ConfigError::ScopeViolation { .. }
        ));
    }

    #[test]
    fn hooks_fire_once_per_scope() {
        let mut registry = ConfiguratorRegistry::empty();
        registry.register(
            Configurator::new()
                .on_enter(Box::new(|config, ctx, _node| {
                    let seen = config.error_log.take().unwrap_or_default();
                    config.error_log = Some(format!("{}+{};", seen, ctx.scope()));
                    Ok(())
                }))
                .on_exit(Box::new(|config, ctx, _node| {
                    let seen = config.error_log.take().unwrap_or_default();
                    config.error_log = Some(format!("{}-{};", seen, ctx.scope()));
                    Ok(())
                })),
        );
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("hosts:\n  \"a\": {}\n").unwrap();
        registry.apply(&doc, &mut config).unwrap();
        assert_eq!(
            config.error_log.as_deref(),
            Some("+global;+host;-host;-global;")
        );
    }

    #[test]
    fn exit_hook_failure_aborts_the_load() {
        let mut registry = ConfiguratorRegistry::empty();
        registry.register(Configurator::new().on_exit(Box::new(|_config, ctx, node| {
            if ctx.scope() == Scope::Host {
                return Err(ConfigError::ScopeResolution {
                    line: node.line,
                    message: "host scope rejected".to_string(),
                });
            }
            Ok(())
        })));
        let mut config = GlobalConfig::new();
        let doc = from_yaml_str("hosts:\n  \"a\": {}\n").unwrap();
        assert!(matches!(
            registry.apply(&doc, &mut config).unwrap_err(),
            ConfigError::ScopeResolution { .. }
        ));
    }
}

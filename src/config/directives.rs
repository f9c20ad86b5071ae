//! Core configuration directives.
//!
//! # Responsibilities
//! - `listen`: resolve addresses, provision or reuse sockets, bind hosts
//! - the runtime knob directives (`max-connections`, `num-threads`, ...)
//! - `error-log` and the opaque `handler` registration directive
//! - scope-exit resolution of listener/host binding
//!
//! # Design Decisions
//! - Handlers only see the config object, the scope context, and the value
//!   node; everything they provision lands in the config object
//! - Dedup happens against the resolved address, before any socket is
//!   opened; reuse of an address with the opposite proxy-protocol setting
//!   is a conflict, never a silent override

use std::path::PathBuf;
use std::str::FromStr;

use crate::config::configurator::{
    Configurator, ConfiguratorRegistry, DispatchPhase, ScopeContext, ScopeSet, Shape,
};
use crate::config::document::{ConfigNode, NodeValue};
use crate::config::error::{ConfigError, ConfigResult};
use crate::config::global::{GlobalConfig, HostId, TlsProvisioner};
use crate::net::address::ListenAddress;
use crate::net::listener::Listener;
use crate::net::socket::{self, SocketOwner};

/// Install the core directive set into `registry`.
pub(crate) fn register_core(registry: &mut ConfiguratorRegistry) {
    registry.register(
        Configurator::new()
            .command(
                "listen",
                ScopeSet::GLOBAL.or(ScopeSet::HOST),
                Shape::Any,
                DispatchPhase::Normal,
                Box::new(on_listen),
            )
            .on_enter(Box::new(on_listen_enter))
            .on_exit(Box::new(on_listen_exit)),
    );
    registry.register(
        Configurator::new()
            .command(
                "error-log",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_error_log),
            )
            .command(
                "max-connections",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_max_connections),
            )
            .command(
                "num-name-resolution-threads",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_num_name_resolution_threads),
            )
            .command(
                "num-ocsp-updaters",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_num_ocsp_updaters),
            )
            .command(
                "num-threads",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_num_threads),
            )
            .command(
                "tcp-fastopen",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_tcp_fastopen),
            )
            .command(
                "temp-buffer-path",
                ScopeSet::GLOBAL,
                Shape::Scalar,
                DispatchPhase::Normal,
                Box::new(on_temp_buffer_path),
            ),
    );
    registry.register(Configurator::new().command(
        "handler",
        ScopeSet::PATH,
        Shape::Scalar,
        DispatchPhase::Deferred,
        Box::new(on_handler),
    ));
}

/// Parsed form of one `listen` occurrence.
#[derive(Debug)]
struct ListenSpec<'a> {
    line: usize,
    hostname: Option<&'a str>,
    servname: &'a str,
    socket_type: &'a str,
    ssl: Option<&'a ConfigNode>,
    proxy_protocol: bool,
    owner: Option<&'a ConfigNode>,
    permission: Option<&'a ConfigNode>,
}

impl<'a> ListenSpec<'a> {
    fn parse(node: &'a ConfigNode) -> ConfigResult<ListenSpec<'a>> {
        match &node.value {
            NodeValue::Scalar(servname) => Ok(ListenSpec {
                line: node.line,
                hostname: None,
                servname,
                socket_type: "tcp",
                ssl: None,
                proxy_protocol: false,
                owner: None,
                permission: None,
            }),
            NodeValue::Mapping(_) => {
                let hostname = match node.get("host") {
                    Some(t) => Some(t.as_scalar().ok_or_else(|| {
                        ConfigError::malformed(t.line, "`host` is not a string")
                    })?),
                    None => None,
                };
                let port = node.get("port").ok_or_else(|| {
                    ConfigError::malformed(node.line, "cannot find mandatory property `port`")
                })?;
                let servname = port.as_scalar().ok_or_else(|| {
                    ConfigError::malformed(port.line, "`port` is not a string")
                })?;
                let socket_type = match node.get("type") {
                    Some(t) => t.as_scalar().ok_or_else(|| {
                        ConfigError::malformed(t.line, "`type` is not a string")
                    })?,
                    None => "tcp",
                };
                let proxy_protocol = match node.get("proxy-protocol") {
                    Some(t) => {
                        let value = t.as_scalar().ok_or_else(|| {
                            ConfigError::malformed(t.line, "`proxy-protocol` must be a string")
                        })?;
                        if value.eq_ignore_ascii_case("on") {
                            true
                        } else if value.eq_ignore_ascii_case("off") {
                            false
                        } else {
                            return Err(ConfigError::malformed(
                                t.line,
                                "value of `proxy-protocol` must be either of: ON,OFF",
                            ));
                        }
                    }
                    None => false,
                };
                Ok(ListenSpec {
                    line: node.line,
                    hostname,
                    servname,
                    socket_type,
                    ssl: node.get("ssl"),
                    proxy_protocol,
                    owner: node.get("owner"),
                    permission: node.get("permission"),
                })
            }
            NodeValue::Sequence(_) => Err(ConfigError::malformed(
                node.line,
                "value must be a string or a mapping (with keys: `port` and optionally `host`)",
            )),
        }
    }
}

fn on_listen(
    config: &mut GlobalConfig,
    ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let spec = ListenSpec::parse(node)?;
    match spec.socket_type {
        "unix" => listen_unix(config, ctx, &spec),
        "tcp" => listen_tcp(config, ctx, &spec),
        other => Err(ConfigError::malformed(
            spec.line,
            format!("unknown listen type: {}", other),
        )),
    }
}

fn listen_unix(
    config: &mut GlobalConfig,
    ctx: &ScopeContext,
    spec: &ListenSpec<'_>,
) -> ConfigResult<()> {
    // owner and permission are validated before any filesystem work so a
    // bad directive leaves no trace
    let owner = match spec.owner {
        Some(t) => {
            let name = t
                .as_scalar()
                .ok_or_else(|| ConfigError::malformed(t.line, "`owner` is not a scalar"))?;
            Some(SocketOwner::resolve(t.line, name)?)
        }
        None => None,
    };
    let mode = match spec.permission {
        Some(t) => {
            let text = t.as_scalar().ok_or_else(|| {
                ConfigError::malformed(t.line, "`permission` must be an octal number")
            })?;
            Some(u32::from_str_radix(text, 8).map_err(|_| {
                ConfigError::malformed(t.line, "`permission` must be an octal number")
            })?)
        }
        None => None,
    };

    let path = PathBuf::from(spec.servname);
    let address = ListenAddress::Unix(path.clone());
    if let Some(listener) = config.listeners.find_mut(&address) {
        if listener.proxy_protocol() != spec.proxy_protocol {
            return Err(proxy_protocol_conflict(spec.line, spec.proxy_protocol));
        }
        listener.attach_host(ctx.host);
        forward_ssl(&mut config.tls_provisioner, spec.ssl, listener, false)
    } else {
        let socket = socket::open_unix_listener(spec.line, &path, owner.as_ref(), mode)?;
        tracing::info!(address = %address, proxy_protocol = spec.proxy_protocol, "listener created");
        let listener = config.listeners.add(Listener::new(
            socket,
            address,
            ctx.host.is_none(),
            spec.proxy_protocol,
        ));
        listener.attach_host(ctx.host);
        forward_ssl(&mut config.tls_provisioner, spec.ssl, listener, true)
    }
}

fn listen_tcp(
    config: &mut GlobalConfig,
    ctx: &ScopeContext,
    spec: &ListenSpec<'_>,
) -> ConfigResult<()> {
    let port: u16 = spec.servname.parse().map_err(|_| {
        ConfigError::malformed(
            spec.line,
            format!(
                "failed to resolve the listening address: {} is not a numeric port",
                spec.servname
            ),
        )
    })?;
    let addresses = socket::resolve_bind_addresses(spec.line, spec.hostname, port)?;
    let fastopen_queue = config.knobs.tcp_fastopen_queue();
    let capabilities = config.capabilities;

    for address in addresses {
        let key = ListenAddress::Tcp(address);
        if let Some(listener) = config.listeners.find_mut(&key) {
            if listener.proxy_protocol() != spec.proxy_protocol {
                return Err(proxy_protocol_conflict(spec.line, spec.proxy_protocol));
            }
            listener.attach_host(ctx.host);
            forward_ssl(&mut config.tls_provisioner, spec.ssl, listener, false)?;
        } else {
            let socket = socket::open_tcp_listener(
                spec.line,
                spec.hostname,
                port,
                address,
                fastopen_queue,
                capabilities,
            )?;
            tracing::info!(address = %key, proxy_protocol = spec.proxy_protocol, "listener created");
            let listener = config.listeners.add(Listener::new(
                socket,
                key,
                ctx.host.is_none(),
                spec.proxy_protocol,
            ));
            listener.attach_host(ctx.host);
            forward_ssl(&mut config.tls_provisioner, spec.ssl, listener, true)?;
        }
    }
    Ok(())
}

fn proxy_protocol_conflict(line: usize, requested: bool) -> ConfigError {
    ConfigError::Conflict {
        line,
        message: format!(
            "`proxy-protocol` cannot be turned {}, already defined as opposite",
            if requested { "on" } else { "off" }
        ),
    }
}

fn forward_ssl(
    provisioner: &mut Option<Box<dyn TlsProvisioner>>,
    ssl: Option<&ConfigNode>,
    listener: &mut Listener,
    listener_is_new: bool,
) -> ConfigResult<()> {
    if let (Some(node), Some(provisioner)) = (ssl, provisioner.as_deref_mut()) {
        provisioner.provision(node, listener, listener_is_new)?;
    }
    Ok(())
}

/// Reserved; scope entry needs no listener work today.
fn on_listen_enter(
    _config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    _node: &ConfigNode,
) -> ConfigResult<()> {
    Ok(())
}

/// Scope-exit resolution of listener/host binding.
fn on_listen_exit(
    config: &mut GlobalConfig,
    ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    if ctx.path.is_some() {
        // path scopes never own listeners
        return Ok(());
    }
    if ctx.host.is_none() {
        // leaving the global scope: every listener still inheriting gets
        // the full host list
        if !config.hosts.is_empty() {
            let all_hosts: Vec<HostId> = (0..config.hosts.len()).map(HostId).collect();
            for listener in config.listeners.iter_mut() {
                listener.resolve_inherited_hosts(&all_hosts);
            }
        }
        return Ok(());
    }
    // leaving a host scope: the host must be reachable through some
    // listener, its own or a global one
    if config.listeners.is_empty() {
        return Err(ConfigError::ScopeResolution {
            line: node.line,
            message: "mandatory configuration directive `listen` does not exist, neither at \
                      global level or at this host level"
                .to_string(),
        });
    }
    Ok(())
}

fn on_error_log(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let path = expect_scalar(node)?;
    config.error_log = if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    };
    Ok(())
}

fn on_max_connections(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let value: i32 = parse_scalar(node, "max-connections")?;
    config.knobs.set_max_connections(value);
    Ok(())
}

fn on_num_threads(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let value: usize = parse_scalar(node, "num-threads")?;
    config
        .knobs
        .set_num_threads(value)
        .map_err(|e| value_range(node, e))
}

fn on_num_name_resolution_threads(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let value: usize = parse_scalar(node, "num-name-resolution-threads")?;
    config
        .knobs
        .set_name_resolution_threads(value)
        .map_err(|e| value_range(node, e))
}

fn on_num_ocsp_updaters(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    // signed parse so that a negative count reports the range error, not a
    // parse error
    let value: i64 = parse_scalar(node, "num-ocsp-updaters")?;
    if value <= 0 {
        return Err(ConfigError::ValueRange {
            line: node.line,
            message: "num-ocsp-updaters must be >=1".to_string(),
        });
    }
    config
        .knobs
        .set_ocsp_updater_capacity(value as usize)
        .map_err(|e| value_range(node, e))
}

fn on_tcp_fastopen(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let value: i32 = parse_scalar(node, "tcp-fastopen")?;
    config.knobs.set_tcp_fastopen_queue(value);
    Ok(())
}

fn on_temp_buffer_path(
    config: &mut GlobalConfig,
    _ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let prefix = expect_scalar(node)?;
    config
        .knobs
        .set_temp_buffer_path(prefix)
        .map_err(|e| value_range(node, e))
}

/// Record an opaque handler key on the current path and forward it to the
/// caller's registrar when one is installed. Decoding the key is entirely
/// the embedder's concern.
fn on_handler(
    config: &mut GlobalConfig,
    ctx: &ScopeContext,
    node: &ConfigNode,
) -> ConfigResult<()> {
    let key = expect_scalar(node)?;
    let (host_id, path_id) = match (ctx.host, ctx.path) {
        (Some(host), Some(path)) => (host, path),
        _ => {
            return Err(ConfigError::malformed(
                node.line,
                "`handler` requires an enclosing path",
            ))
        }
    };
    let host = &mut config.hosts[host_id.0];
    let host_name = host.name.clone();
    let path = &mut host.paths[path_id.0];
    let path_prefix = path.path.clone();
    path.handlers.push(key.to_string());

    if let Some(registrar) = config.handler_registrar.as_deref_mut() {
        registrar.register(&host_name, &path_prefix, key)?;
    }
    Ok(())
}

fn expect_scalar(node: &ConfigNode) -> ConfigResult<&str> {
    node.as_scalar()
        .ok_or_else(|| ConfigError::malformed(node.line, "expected a scalar value"))
}

fn parse_scalar<T: FromStr>(node: &ConfigNode, name: &str) -> ConfigResult<T> {
    expect_scalar(node)?.trim().parse().map_err(|_| {
        ConfigError::ValueRange {
            line: node.line,
            message: format!("invalid value for `{}` (expected an integer)", name),
        }
    })
}

fn value_range(node: &ConfigNode, error: crate::config::knobs::KnobError) -> ConfigError {
    ConfigError::ValueRange {
        line: node.line,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::document::from_yaml_str;

    #[test]
    fn scalar_form_defaults() {
        let node = from_yaml_str("\"8080\"").unwrap();
        let spec = ListenSpec::parse(&node).unwrap();
        assert_eq!(spec.servname, "8080");
        assert_eq!(spec.hostname, None);
        assert_eq!(spec.socket_type, "tcp");
        assert!(!spec.proxy_protocol);
        assert!(spec.ssl.is_none());
    }

    #[test]
    fn mapping_form_fields() {
        let node = from_yaml_str(
            "host: \"127.0.0.1\"\nport: \"9090\"\ntype: unix\nproxy-protocol: \"on\"\nssl:\n  certificate-file: /tmp/c.pem\n",
        )
        .unwrap();
        let spec = ListenSpec::parse(&node).unwrap();
        assert_eq!(spec.hostname, Some("127.0.0.1"));
        assert_eq!(spec.servname, "9090");
        assert_eq!(spec.socket_type, "unix");
        assert!(spec.proxy_protocol);
        assert!(spec.ssl.is_some());
    }

    #[test]
    fn proxy_protocol_is_case_insensitive_and_validated() {
        let node = from_yaml_str("port: \"1\"\nproxy-protocol: \"ON\"\n").unwrap();
        assert!(ListenSpec::parse(&node).unwrap().proxy_protocol);

        let node = from_yaml_str("port: \"1\"\nproxy-protocol: \"Off\"\n").unwrap();
        assert!(!ListenSpec::parse(&node).unwrap().proxy_protocol);

        let node = from_yaml_str("port: \"1\"\nproxy-protocol: \"maybe\"\n").unwrap();
        let err = ListenSpec::parse(&node).unwrap_err();
        assert!(err
            .to_string()
            .contains("value of `proxy-protocol` must be either of: ON,OFF"));
    }

    #[test]
    fn mapping_form_requires_port() {
        let node = from_yaml_str("host: \"::1\"\n").unwrap();
        let err = ListenSpec::parse(&node).unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot find mandatory property `port`"));
    }

    #[test]
    fn sequence_form_is_rejected() {
        let node = from_yaml_str("- \"8080\"\n").unwrap();
        let err = ListenSpec::parse(&node).unwrap_err();
        assert!(err.to_string().contains("value must be a string or a mapping"));
    }

    #[test]
    fn unknown_listen_type_is_rejected() {
        let mut config = GlobalConfig::new();
        let ctx = ScopeContext::default();
        let node = from_yaml_str("port: \"1234\"\ntype: sctp\n").unwrap();
        let err = on_listen(&mut config, &ctx, &node).unwrap_err();
        assert!(err.to_string().contains("unknown listen type: sctp"));
    }

    #[test]
    fn bad_permission_string_fails_before_any_socket_work() {
        let mut config = GlobalConfig::new();
        let ctx = ScopeContext::default();
        let node =
            from_yaml_str("port: /tmp/never-created.sock\ntype: unix\npermission: \"worldwide\"\n")
                .unwrap();
        let err = on_listen(&mut config, &ctx, &node).unwrap_err();
        assert!(err
            .to_string()
            .contains("`permission` must be an octal number"));
        assert!(config.listeners.is_empty());
        assert!(!std::path::Path::new("/tmp/never-created.sock").exists());
    }
}

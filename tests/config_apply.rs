//! End-to-end configuration load scenarios.
//!
//! Each test drives a whole document through the configurator walk and
//! inspects the provisioned listeners and knobs. Ports are unique per test
//! so the suite can run in parallel.

use std::sync::{Arc, Mutex};

use server_core::{
    from_yaml_str, ConfigError, ConfigResult, ConfiguratorRegistry, GlobalConfig,
    HandlerRegistrar, HostId, SocketCapabilities,
};

fn apply(yaml: &str) -> (GlobalConfig, ConfigResult<()>) {
    let mut config = GlobalConfig::new();
    let result = from_yaml_str(yaml)
        .and_then(|document| ConfiguratorRegistry::new().apply(&document, &mut config));
    (config, result)
}

#[test]
fn bare_scalar_listen_binds_the_wildcard_address() {
    let (config, result) = apply("listen: \"49801\"\nhosts:\n  \"a.example\": {}\n");
    result.unwrap();

    assert_eq!(config.listeners.len(), 1);
    let listener = config.listeners.iter().next().unwrap();
    assert_eq!(listener.address().to_string(), "0.0.0.0:49801");
    assert!(!listener.proxy_protocol());
    // global-scope listener resolves to the full host list on exit
    assert_eq!(listener.hosts(), Some(&[HostId(0)][..]));
    assert!(listener.fd() >= 0);
}

#[test]
fn duplicate_addresses_share_one_listener() {
    let (config, result) = apply(
        "listen:\n  host: \"127.0.0.1\"\n  port: \"49802\"\nlisten:\n  host: \"127.0.0.1\"\n  port: \"49802\"\n",
    );
    result.unwrap();
    assert_eq!(config.listeners.len(), 1);
}

#[test]
fn proxy_protocol_conflict_fails_and_keeps_the_original_flag() {
    let (config, result) = apply(
        "listen:\n  host: \"127.0.0.1\"\n  port: \"49803\"\nlisten:\n  host: \"127.0.0.1\"\n  port: \"49803\"\n  proxy-protocol: \"ON\"\n",
    );
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::Conflict { .. }));
    assert!(err
        .to_string()
        .contains("`proxy-protocol` cannot be turned on, already defined as opposite"));

    // the first occurrence's listener survives untouched
    assert_eq!(config.listeners.len(), 1);
    assert!(!config.listeners.iter().next().unwrap().proxy_protocol());
}

#[test]
fn global_listeners_serve_every_host() {
    let (config, result) = apply(
        "listen: \"49804\"\nhosts:\n  \"a.example\": {}\n  \"b.example\": {}\n",
    );
    result.unwrap();

    assert_eq!(config.hosts.len(), 2);
    for listener in config.listeners.iter() {
        assert_eq!(listener.hosts(), Some(&[HostId(0), HostId(1)][..]));
    }
}

#[test]
fn one_socket_fans_out_to_every_referencing_host() {
    let (config, result) = apply(
        "hosts:\n  \"a.example\":\n    listen:\n      host: \"127.0.0.1\"\n      port: \"49805\"\n  \"b.example\":\n    listen:\n      host: \"127.0.0.1\"\n      port: \"49805\"\n",
    );
    result.unwrap();

    assert_eq!(config.listeners.len(), 1);
    let listener = config.listeners.iter().next().unwrap();
    assert_eq!(listener.hosts(), Some(&[HostId(0), HostId(1)][..]));
}

#[test]
fn host_without_any_listener_fails() {
    let (_config, result) = apply("hosts:\n  \"lonely.example\": {}\n");
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::ScopeResolution { .. }));
    assert!(err
        .to_string()
        .contains("mandatory configuration directive `listen` does not exist"));
}

#[test]
fn global_listen_satisfies_hostless_scopes() {
    let (config, result) = apply("listen: \"49806\"\nhosts:\n  \"lonely.example\": {}\n");
    result.unwrap();
    assert_eq!(config.listeners.len(), 1);
}

#[test]
fn num_threads_zero_is_rejected() {
    let (config, result) = apply("num-threads: 0\n");
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::ValueRange { .. }));
    assert!(err.to_string().contains("num-threads must be >=1"));
    // previous (default) value survives the rejected write
    assert!(config.snapshot().num_threads >= 1);
}

#[test]
fn knob_values_are_visible_in_the_snapshot() {
    let (config, result) = apply(
        "max-connections: -5\nnum-threads: 3\nnum-name-resolution-threads: 2\nnum-ocsp-updaters: 9\nerror-log: /var/log/server.log\ntemp-buffer-path: /var/tmp\n",
    );
    result.unwrap();

    let snapshot = config.snapshot();
    // max-connections has no lower bound at this layer
    assert_eq!(snapshot.max_connections, -5);
    assert_eq!(snapshot.num_threads, 3);
    assert_eq!(snapshot.num_name_resolution_threads, 2);
    assert_eq!(snapshot.num_ocsp_updaters, 9);
    assert_eq!(snapshot.error_log.as_deref(), Some("/var/log/server.log"));
    assert_eq!(snapshot.temp_buffer_path, "/var/tmp");
}

#[test]
fn empty_error_log_means_none() {
    let (config, result) = apply("error-log: \"\"\n");
    result.unwrap();
    assert_eq!(config.snapshot().error_log, None);
}

#[test]
fn tcp_fastopen_is_clamped_only_on_incapable_platforms() {
    let (config, result) = apply("tcp-fastopen: 77\n");
    result.unwrap();
    let expected = if SocketCapabilities::detect().tcp_fastopen {
        77
    } else {
        0
    };
    assert_eq!(config.snapshot().tcp_fastopen, expected);
}

#[test]
fn negative_ocsp_updater_count_is_a_range_error() {
    let (_config, result) = apply("num-ocsp-updaters: -1\n");
    let err = result.unwrap_err();
    assert!(err.to_string().contains("num-ocsp-updaters must be >=1"));
}

#[test]
fn unknown_directive_aborts_the_load() {
    let (_config, result) = apply("listne: \"8080\"\n");
    assert!(matches!(
        result.unwrap_err(),
        ConfigError::UnknownDirective { .. }
    ));
}

#[test]
fn listen_is_illegal_at_path_scope() {
    let (_config, result) = apply(
        "listen: \"49807\"\nhosts:\n  \"a.example\":\n    paths:\n      \"/\":\n        listen: \"49808\"\n",
    );
    assert!(matches!(
        result.unwrap_err(),
        ConfigError::ScopeViolation { .. }
    ));
}

#[test]
fn unix_listener_replaces_a_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.sock");
    let yaml = format!("listen:\n  port: {}\n  type: unix\n", path.display());

    let (first, result) = apply(&yaml);
    result.unwrap();
    assert_eq!(first.listeners.len(), 1);
    drop(first); // socket closes, the file stays behind as a stale socket

    let (second, result) = apply(&yaml);
    result.unwrap();
    assert_eq!(second.listeners.len(), 1);
    assert_eq!(
        second.listeners.iter().next().unwrap().address().to_string(),
        format!("unix:{}", path.display())
    );
}

#[test]
fn unix_listener_refuses_a_regular_file_and_leaves_it_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("precious.txt");
    std::fs::write(&path, b"do not delete").unwrap();

    let yaml = format!("listen:\n  port: {}\n  type: unix\n", path.display());
    let (config, result) = apply(&yaml);
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::Conflict { .. }));
    assert!(err
        .to_string()
        .contains("already exists and is not a unix socket"));
    assert_eq!(std::fs::read(&path).unwrap(), b"do not delete");
    assert!(config.listeners.is_empty());
}

#[test]
fn unresolvable_owner_fails_before_any_socket_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("owned.sock");
    let yaml = format!(
        "listen:\n  port: {}\n  type: unix\n  owner: nonexistent-user\n",
        path.display()
    );

    let (config, result) = apply(&yaml);
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::UnknownUser { .. }));
    assert!(err.to_string().contains("nonexistent-user"));
    assert!(config.listeners.is_empty());
    assert!(!path.exists());
}

#[test]
fn failed_load_keeps_earlier_listeners_open() {
    // loading is not transactional: the listener provisioned before the
    // failing directive stays with the config object
    let (config, result) = apply(
        "listen:\n  host: \"127.0.0.1\"\n  port: \"49809\"\nnum-threads: 0\n",
    );
    assert!(result.is_err());
    assert_eq!(config.listeners.len(), 1);
}

struct RecordingRegistrar(Arc<Mutex<Vec<(String, String, String)>>>);

impl HandlerRegistrar for RecordingRegistrar {
    fn register(&mut self, host: &str, path: &str, key: &str) -> ConfigResult<()> {
        self.0
            .lock()
            .unwrap()
            .push((host.to_string(), path.to_string(), key.to_string()));
        Ok(())
    }
}

#[test]
fn handler_keys_are_recorded_and_forwarded() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut config = GlobalConfig::new();
    config.set_handler_registrar(Box::new(RecordingRegistrar(Arc::clone(&seen))));

    let document = from_yaml_str(
        "listen: \"49810\"\nhosts:\n  \"a.example\":\n    paths:\n      \"/api\":\n        handler: \"cb-123\"\n",
    )
    .unwrap();
    ConfiguratorRegistry::new()
        .apply(&document, &mut config)
        .unwrap();

    assert_eq!(config.hosts[0].paths[0].handlers, vec!["cb-123"]);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[(
            "a.example".to_string(),
            "/api".to_string(),
            "cb-123".to_string()
        )]
    );
}

#[test]
fn temp_buffer_path_overflow_is_rejected_with_location() {
    let long = "/x".repeat(200);
    let (_config, result) = apply(&format!("temp-buffer-path: \"{}\"\n", long));
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::ValueRange { line: 1, .. }));
    assert!(err.to_string().contains("path is too long"));
}

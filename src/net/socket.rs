//! Socket provisioning.
//!
//! # Responsibilities
//! - Open and tune one listening socket per resolved address (TCP or Unix)
//! - Resolve host/port pairs with wildcard-bind semantics
//! - Provision Unix socket files: stale-socket replacement, ownership, mode
//!
//! # Design Decisions
//! - Platform-conditional options sit behind [`SocketCapabilities`],
//!   resolved once at startup; callers branch on capability flags and `cfg`
//!   stays confined to the lowest-level helpers here
//! - Any failure while opening one socket closes that descriptor and aborts
//!   the directive occurrence; sockets opened earlier in the load survive
//!   (loading is not transactional)

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::error::{ConfigError, ConfigResult};

/// Platform socket-option support, probed once at startup.
#[derive(Debug, Clone, Copy)]
pub struct SocketCapabilities {
    pub tcp_defer_accept: bool,
    pub tcp_fastopen: bool,
}

impl SocketCapabilities {
    pub fn detect() -> Self {
        SocketCapabilities {
            tcp_defer_accept: cfg!(any(target_os = "linux", target_os = "android")),
            tcp_fastopen: cfg!(any(
                target_os = "linux",
                target_os = "android",
                target_os = "macos"
            )),
        }
    }
}

/// A Unix socket owner resolved from the user database.
#[derive(Debug, Clone)]
pub struct SocketOwner {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
}

impl SocketOwner {
    /// Look up `name`; an unknown user fails the directive before any
    /// filesystem or socket work happens.
    pub fn resolve(line: usize, name: &str) -> ConfigResult<SocketOwner> {
        let user = nix::unistd::User::from_name(name)
            .ok()
            .flatten()
            .ok_or_else(|| ConfigError::UnknownUser {
                line,
                user: name.to_string(),
            })?;
        Ok(SocketOwner {
            user: name.to_string(),
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        })
    }
}

/// Resolve a `listen` host/port pair into bind candidates.
///
/// An absent host means the wildcard address. The service must be numeric;
/// symbolic service names are not resolved.
pub fn resolve_bind_addresses(
    line: usize,
    host: Option<&str>,
    port: u16,
) -> ConfigResult<Vec<SocketAddr>> {
    let Some(host) = host else {
        return Ok(vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))]);
    };
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::os(line, "failed to resolve the listening address", e))?
        .collect();
    if addresses.is_empty() {
        return Err(ConfigError::malformed(
            line,
            "failed to resolve the listening address: resolution returned an empty list",
        ));
    }
    Ok(addresses)
}

/// Open, tune, bind, and start listening on one TCP address.
///
/// `fastopen_queue` comes from the knob store; zero disables the option
/// entirely, and the knob layer guarantees it is zero on platforms without
/// the capability.
pub fn open_tcp_listener(
    line: usize,
    host: Option<&str>,
    port: u16,
    address: SocketAddr,
    fastopen_queue: i32,
    capabilities: SocketCapabilities,
) -> ConfigResult<Socket> {
    let open = || -> io::Result<Socket> {
        let socket = Socket::new(
            Domain::for_address(address),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_cloexec(true)?;
        socket.set_reuse_address(true)?;
        if capabilities.tcp_defer_accept {
            set_defer_accept(&socket)?;
        }
        if address.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.bind(&address.into())?;
        socket.listen(libc::SOMAXCONN)?;

        if fastopen_queue > 0 && capabilities.tcp_fastopen {
            // a fast-open failure downgrades the socket, it does not fail
            // the load
            if let Err(e) = set_fastopen(&socket, fastopen_queue) {
                tracing::warn!(address = %address, error = %e, "failed to set TCP_FASTOPEN");
            }
        }
        Ok(socket)
    };

    open().map_err(|e| {
        ConfigError::os(
            line,
            format!(
                "failed to listen to port {}:{}",
                host.unwrap_or("ANY"),
                port
            ),
            e,
        )
    })
}

/// Open a Unix-domain listener at `path`.
///
/// An existing socket file is treated as stale and replaced; any other file
/// type at the path fails the load without touching it. Ownership and mode
/// are applied after the socket is listening, chown before chmod.
pub fn open_unix_listener(
    line: usize,
    path: &Path,
    owner: Option<&SocketOwner>,
    mode: Option<u32>,
) -> ConfigResult<Socket> {
    let bind_address = SockAddr::unix(path).map_err(|_| {
        ConfigError::malformed(
            line,
            format!(
                "path:{} is too long as a unix socket name",
                path.display()
            ),
        )
    })?;

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            fs::remove_file(path).map_err(|e| {
                ConfigError::os(
                    line,
                    format!("failed to remove stale socket:{}", path.display()),
                    e,
                )
            })?;
        }
        Ok(_) => {
            return Err(ConfigError::Conflict {
                line,
                message: format!(
                    "path:{} already exists and is not a unix socket",
                    path.display()
                ),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ConfigError::os(
                line,
                format!("failed to inspect socket path:{}", path.display()),
                e,
            ));
        }
    }

    let socket = (|| -> io::Result<Socket> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.bind(&bind_address)?;
        socket.listen(libc::SOMAXCONN)?;
        socket.set_cloexec(true)?;
        Ok(socket)
    })()
    .map_err(|e| {
        ConfigError::os(
            line,
            format!("failed to listen to socket:{}", path.display()),
            e,
        )
    })?;

    if let Some(owner) = owner {
        std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid)).map_err(|e| {
            ConfigError::os(
                line,
                format!(
                    "failed to chown socket:{} to {}",
                    path.display(),
                    owner.user
                ),
                e,
            )
        })?;
    }
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            ConfigError::os(
                line,
                format!("failed to chmod socket:{} to {:o}", path.display(), mode),
                e,
            )
        })?;
    }

    Ok(socket)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
fn setsockopt_int(
    socket: &Socket,
    level: libc::c_int,
    option: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            option,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_defer_accept(socket: &Socket) -> io::Result<()> {
    setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, 1)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_defer_accept(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_fastopen(socket: &Socket, queue: i32) -> io::Result<()> {
    setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN, queue)
}

#[cfg(target_os = "macos")]
fn set_fastopen(socket: &Socket, _queue: i32) -> io::Result<()> {
    // Darwin only accepts 1 as the option value
    setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN, 1)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
fn set_fastopen(_socket: &Socket, _queue: i32) -> io::Result<()> {
    Ok(())
}

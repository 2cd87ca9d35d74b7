//! Works out which published endpoint, and so which branch, is serving a request.
//!
//! Behind a reverse proxy the socket's local address is usually loopback, so
//! the host headers are consulted first and loopback results are swapped for
//! an interface address the branch directory recognises. The port is always
//! the server's own listening port; headers can name a host but never a port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::directory::{Branch, BranchDirectory, DirectoryError};

/// Per-request inputs to endpoint resolution, built by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingRequest {
    /// Raw `X-Forwarded-Host` header value.
    pub forwarded_host: Option<String>,
    /// Raw `Host` header value.
    pub host: Option<String>,
    /// Local address of the accepted socket.
    pub local_addr: SocketAddr,
}

impl ServingRequest {
    pub fn new(local_addr: SocketAddr) -> Self {
        Self {
            forwarded_host: None,
            host: None,
            local_addr,
        }
    }

    pub fn with_forwarded_host(mut self, value: impl Into<String>) -> Self {
        self.forwarded_host = Some(value.into());
        self
    }

    pub fn with_host(mut self, value: impl Into<String>) -> Self {
        self.host = Some(value.into());
        self
    }
}

/// The resolved serving endpoint. `branch` is `None` when no branch publishes
/// it ("unaffiliated").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingEndpoint {
    pub ip: IpAddr,
    pub port: u16,
    pub branch: Option<Branch>,
}

impl ServingEndpoint {
    pub fn branch_id(&self) -> Option<i64> {
        self.branch.as_ref().map(|branch| branch.id)
    }
}

/// Source of this host's non-loopback interface addresses.
pub trait InterfaceSource: Send + Sync {
    fn addresses(&self) -> Vec<IpAddr>;
}

/// Reads interface addresses from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn addresses(&self) -> Vec<IpAddr> {
        match get_if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces
                .into_iter()
                .filter(|iface| !iface.is_loopback())
                .map(|iface| iface.ip())
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to enumerate network interfaces");
                Vec::new()
            }
        }
    }
}

/// A fixed address list, for hosts whose interfaces are known up front.
#[derive(Debug, Clone, Default)]
pub struct FixedInterfaces(pub Vec<IpAddr>);

impl InterfaceSource for FixedInterfaces {
    fn addresses(&self) -> Vec<IpAddr> {
        self.0.clone()
    }
}

#[derive(Clone)]
pub struct NetworkIdentityResolver {
    directory: Arc<dyn BranchDirectory>,
    interfaces: Arc<dyn InterfaceSource>,
}

impl NetworkIdentityResolver {
    pub fn new(directory: Arc<dyn BranchDirectory>, interfaces: Arc<dyn InterfaceSource>) -> Self {
        Self {
            directory,
            interfaces,
        }
    }

    /// Resolves the serving endpoint and the branch that publishes it.
    ///
    /// # Errors
    ///
    /// Only directory failures are errors. An endpoint no branch publishes is
    /// returned with `branch: None`.
    pub fn resolve(&self, request: &ServingRequest) -> Result<ServingEndpoint, DirectoryError> {
        let port = request.local_addr.port();

        let ip = request
            .forwarded_host
            .as_deref()
            .and_then(|value| value.split(',').next())
            .and_then(host_ip)
            .or_else(|| request.host.as_deref().and_then(host_ip))
            .unwrap_or_else(|| request.local_addr.ip());

        if ip.is_loopback() || ip.is_unspecified() {
            for candidate in self.interfaces.addresses() {
                if candidate.is_loopback() {
                    continue;
                }
                if let Some(branch) = self.directory.branch_for_endpoint(candidate, port)? {
                    debug!(masked = %ip, substituted = %candidate, branch = branch.id, "replaced loopback serving address");
                    return Ok(ServingEndpoint {
                        ip: candidate,
                        port,
                        branch: Some(branch),
                    });
                }
            }
            debug!(%ip, port, "no interface address is published by any branch");
            return Ok(ServingEndpoint {
                ip,
                port,
                branch: None,
            });
        }

        let branch = self.directory.branch_for_endpoint(ip, port)?;
        debug!(%ip, port, branch = ?branch.as_ref().map(|b| b.id), "resolved serving endpoint");
        Ok(ServingEndpoint { ip, port, branch })
    }
}

/// The address named by a host header value, ignoring any port it carries.
/// Only IP literals count, plus `localhost` as loopback. Other names are never
/// looked up and yield `None`.
fn host_ip(value: &str) -> Option<IpAddr> {
    let host = strip_port(value.trim())?;
    if host.eq_ignore_ascii_case("localhost") {
        return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            debug!(host, "ignoring non-literal host header");
            None
        }
    }
}

fn strip_port(value: &str) -> Option<&str> {
    if value.is_empty() {
        return None;
    }
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next().filter(|host| !host.is_empty());
    }
    // A bare IPv6 literal has several colons and no port.
    match value.matches(':').count() {
        1 => value.split(':').next().filter(|host| !host.is_empty()),
        _ => Some(value),
    }
}

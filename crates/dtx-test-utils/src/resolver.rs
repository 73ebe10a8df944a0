//! Fixed host table for DNS-dependent tests

use async_trait::async_trait;
use dtx_preprocess::Resolver;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Resolver answering from a static table; unknown hosts fail with NotFound
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: RwLock<HashMap<String, Vec<IpAddr>>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `addrs`
    #[must_use]
    pub fn with_host(self, host: &str, addrs: &[IpAddr]) -> Self {
        self.hosts.write().insert(host.to_ascii_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        self.hosts
            .read()
            .get(&host.to_ascii_lowercase())
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such host: {host}")))
    }
}

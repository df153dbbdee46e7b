//! System name resolver
//!
//! Resolves through the operating system resolver (`getaddrinfo`), which is
//! what the surrounding tooling uses for the same names.

use crate::error::{Error, Result};
use crate::traits::NameResolver;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tokio::net::lookup_host;

/// Name resolver backed by the OS resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl SystemResolver {
    /// Create a new system resolver
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        let host = hostname.trim_end_matches('.');
        if host.is_empty() {
            return Err(Error::invalid_input("Cannot resolve an empty hostname"));
        }

        let addresses: BTreeSet<IpAddr> = lookup_host((host, 0))
            .await
            .map_err(|e| Error::resolution(format!("{}: {}", host, e)))?
            .map(|socket| socket.ip())
            .collect();

        Ok(addresses.into_iter().collect())
    }

    fn resolver_name(&self) -> &'static str {
        "system"
    }
}

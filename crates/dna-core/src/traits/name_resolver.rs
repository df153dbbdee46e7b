// # Name Resolver Trait
//
// Defines the interface for turning a hostname into the addresses serving it.
//
// ## Implementations
//
// - System resolver: `crate::resolver::SystemResolver` (OS resolver, getaddrinfo)
// - Test doubles: static tables in the contract tests
//
// ## Usage
//
// ```rust,ignore
// use dna_core::NameResolver;
//
// let addresses = resolver.resolve("svc.eu-fr-paris.example.com").await?;
// ```

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for name resolution implementations
///
/// # Responsibilities
///
/// - ✅ Resolve exactly one hostname per call
/// - ✅ Return an error for unknown names or transport failures
///
/// ## Not Responsible For
/// - ❌ Timeouts (the engine bounds every call with the configured DNS timeout)
/// - ❌ Retry logic (a failed lookup simply contributes no addresses)
/// - ❌ Zone expansion or grouping (owned by the pipeline stages)
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve a hostname
    ///
    /// # Parameters
    ///
    /// - `hostname`: The hostname to resolve (lower-cased, no trailing dot)
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<IpAddr>)`: The addresses, possibly empty
    /// - `Err(Error)`: Resolution failed
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, crate::Error>;

    /// Get the resolver name (for logging/debugging)
    fn resolver_name(&self) -> &'static str;
}

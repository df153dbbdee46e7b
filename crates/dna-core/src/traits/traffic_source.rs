// # Traffic Source Trait
//
// Defines the interface for fetching observed outbound traffic.
//
// ## Purpose
//
// Two queries are needed per run:
// - The primary outbound sample, which drives discovery
// - A wider sample restricted to one address list, used to corroborate
//   removals before an address is dropped
//
// ## Implementations
//
// - Workloader exports: `dna-workloader` crate

use async_trait::async_trait;

use crate::model::{AddressList, FlowRecord, TimeWindow};

/// Trait for traffic source implementations
///
/// Implementations return raw records; filtering is owned by the engine.
/// Rows that cannot be turned into a [`FlowRecord`] are skipped with a
/// warning rather than failing the whole query.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    /// Outbound traffic observed during a window
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<FlowRecord>)`: Raw records, in export order
    /// - `Err(Error)`: The export failed or produced no usable output
    async fn outbound_flows(&self, window: &TimeWindow) -> Result<Vec<FlowRecord>, crate::Error>;

    /// Traffic destined to the members of an address list during a window
    ///
    /// # Parameters
    ///
    /// - `list`: The list to query; it has already been created in the store
    /// - `window`: The lookback window
    async fn flows_to_list(
        &self,
        list: &AddressList,
        window: &TimeWindow,
    ) -> Result<Vec<FlowRecord>, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

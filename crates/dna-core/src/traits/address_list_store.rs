// # Address List Store Trait
//
// Defines the interface to the external store holding address lists.
//
// ## Purpose
//
// State is read once at run start and written once at run end. Between the
// two, the engine owns every list exclusively (single-writer assumption).
//
// ## Implementations
//
// - In-memory: `crate::store::MemoryAddressListStore`
// - Workloader exports/imports: `dna-workloader` crate

use async_trait::async_trait;

use crate::model::AddressList;

/// Trait for address list store implementations
///
/// # Responsibilities
///
/// - ✅ Load every list (managed or not; the engine filters by prefix)
/// - ✅ Import created and updated lists as given
/// - ✅ Create and delete temporary lists on request
///
/// ## Not Responsible For
/// - ❌ Deciding which lists change (owned by the engine)
/// - ❌ Retry logic (a failed write is reported by the engine)
#[async_trait]
pub trait AddressListStore: Send + Sync {
    /// Load all address lists
    async fn load_lists(&self) -> Result<Vec<AddressList>, crate::Error>;

    /// Import new lists
    ///
    /// Lists carry no identifier yet; the store assigns one.
    async fn create_lists(&self, lists: &[AddressList]) -> Result<(), crate::Error>;

    /// Import updated lists, matched by identifier
    async fn update_lists(&self, lists: &[AddressList]) -> Result<(), crate::Error>;

    /// Create a temporary list and return its identifier
    async fn create_temporary_list(&self, list: &AddressList) -> Result<String, crate::Error>;

    /// Delete a list by identifier
    async fn delete_list(&self, identifier: &str) -> Result<(), crate::Error>;

    /// Get the store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}

// # Memory Address List Store
//
// In-memory implementation of AddressListStore.
//
// ## Purpose
//
// Holds address lists in process memory. Used by the contract tests, the
// embedding demo, and any caller that wants to plan a run against a
// snapshot without touching the real store.
//
// ## Identifiers
//
// Lists receive `/iplists/<n>` identifiers in creation order, mirroring the
// hrefs handed out by the real store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::AddressList;
use crate::traits::AddressListStore;
use crate::Error;

/// In-memory address list store
///
/// Lists are keyed by identifier. Clones share the same lists, so a test can
/// hand one clone to the engine and inspect the other.
///
/// # Example
///
/// ```rust,no_run
/// use dna_core::store::MemoryAddressListStore;
/// use dna_core::{AddressList, AddressListStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryAddressListStore::new();
///     store.create_lists(&[AddressList::synthesized("DNA_svc-IPL", "")]).await?;
///
///     let lists = store.load_lists().await?;
///     assert_eq!(lists[0].identifier.as_deref(), Some("/iplists/1"));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryAddressListStore {
    inner: Arc<RwLock<BTreeMap<String, AddressList>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryAddressListStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a store seeded with existing lists
    ///
    /// Lists without an identifier receive one.
    pub fn with_lists(lists: impl IntoIterator<Item = AddressList>) -> Self {
        let store = Self::new();
        let mut seeded = BTreeMap::new();
        for mut list in lists {
            let identifier = match list.identifier.clone() {
                Some(identifier) => identifier,
                None => store.allocate(&seeded),
            };
            list.identifier = Some(identifier.clone());
            list.is_new = false;
            seeded.insert(identifier, list);
        }
        Self {
            inner: Arc::new(RwLock::new(seeded)),
            next_id: store.next_id,
        }
    }

    /// Next `/iplists/<n>` identifier not present in `taken`
    fn allocate(&self, taken: &BTreeMap<String, AddressList>) -> String {
        loop {
            let identifier = format!("/iplists/{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            if !taken.contains_key(&identifier) {
                return identifier;
            }
        }
    }

    /// Number of lists in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Look up a list by name
    pub async fn get_by_name(&self, name: &str) -> Option<AddressList> {
        self.inner.read().await.values().find(|list| list.name == name).cloned()
    }
}

impl Default for MemoryAddressListStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressListStore for MemoryAddressListStore {
    async fn load_lists(&self) -> Result<Vec<AddressList>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.values().cloned().collect())
    }

    async fn create_lists(&self, lists: &[AddressList]) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        for list in lists {
            if guard.values().any(|stored| stored.name == list.name) {
                return Err(Error::store(format!("List {} already exists", list.name)));
            }
            let identifier = self.allocate(&guard);
            let mut stored = list.clone();
            stored.identifier = Some(identifier.clone());
            stored.is_new = false;
            guard.insert(identifier, stored);
        }
        Ok(())
    }

    async fn update_lists(&self, lists: &[AddressList]) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        for list in lists {
            let identifier = list
                .identifier
                .as_ref()
                .ok_or_else(|| Error::store(format!("List {} has no identifier", list.name)))?;
            let stored = guard
                .get_mut(identifier)
                .ok_or_else(|| Error::store(format!("Unknown list {}", identifier)))?;
            *stored = list.clone();
            stored.is_new = false;
        }
        Ok(())
    }

    async fn create_temporary_list(&self, list: &AddressList) -> Result<String, Error> {
        let mut guard = self.inner.write().await;
        let identifier = self.allocate(&guard);
        let mut stored = list.clone();
        stored.identifier = Some(identifier.clone());
        guard.insert(identifier.clone(), stored);
        Ok(identifier)
    }

    async fn delete_list(&self, identifier: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard
            .remove(identifier)
            .map(|_| ())
            .ok_or_else(|| Error::store(format!("Unknown list {}", identifier)))
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

// # Address List Store Implementations
//
// This module provides implementations of the AddressListStore trait that
// live inside the core crate. The workloader-backed store lives in the
// `dna-workloader` crate.

pub mod memory;

pub use memory::MemoryAddressListStore;

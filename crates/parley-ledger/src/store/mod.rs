//! High-level store API.

pub mod ledger_store;

pub use ledger_store::LedgerStore;

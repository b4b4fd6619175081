//! Stateless row repositories — every method takes `&Connection`.
//!
//! Transaction boundaries and per-chat serialization live one level up,
//! in [`crate::store::ledger_store::LedgerStore`].

pub mod agent;
pub mod attachment;
pub mod chat;
pub mod message;
pub mod setting;
pub mod tool_call;

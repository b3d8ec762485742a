//! Core abstractions for iLibrary: credential and entity records, the remote host
//! contract, the local cache contract and the published sync state.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod cache;
pub mod credentials;
pub mod records;
pub mod remote;
pub mod state;

//! Remote host access: the iLibrary bridge service over HTTP(S), or the IBM i
//! Access ODBC driver directly when built with the `odbc` feature.

mod archive;
pub mod bridge;
#[cfg(feature = "odbc")]
pub mod odbc;
pub mod statements;

pub use bridge::{BridgeConnector, BridgeHost, BridgeSettings};
#[cfg(feature = "odbc")]
pub use odbc::{OdbcConnector, OdbcHost};

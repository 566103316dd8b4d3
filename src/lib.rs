// ============================================================================
// dbbridge Library
// ============================================================================
//
// Session layer of a database-to-database bridge: caches native environments,
// server connections and authenticated sessions, and maps the client's nested
// transactions onto one remote transaction with numbered savepoints.
//
// ============================================================================

pub mod core;
pub mod native;
pub mod environ;
pub mod registry;
pub mod connection;
pub mod transaction;
pub mod client;

// Re-export main types for convenience
pub use crate::core::{BridgeError, ErrorKind, Result, IsolationLevel, HandleKind, HandleClass};

pub use connection::{
    CacheManager,
    CacheStats,
    SessionInfo,
    SessionRequest,
    SessionReference,
    config::{BridgeConfig, FormatSettings},
};
pub use transaction::{TransactionObserver, XactState};
pub use registry::HandleId;
pub use client::BridgeClient;
pub use native::{NativeError, RemoteDriver};

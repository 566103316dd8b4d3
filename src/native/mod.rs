// ============================================================================
// Native Client Seam
// ============================================================================
//
// Everything the cache needs from the remote client library. Each call is
// synchronous and blocks on the network beneath it.
//
// ============================================================================

pub mod loopback;

use crate::core::{
    Credentials, EnvHandle, ErrorHandle, HandleClass, HandleKind, IsolationLevel, RawHandle,
    ServerHandle, ServerStatus, ServerVersion, SessionHandle, SessionTags, TxnHandle, TypeHandle,
};
use std::fmt;

pub use loopback::{DriverCall, DriverOp, LoopbackDriver};

/// Diagnostic reported by the remote client library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ORA-{:05}: {}", self.code, self.message)
    }
}

impl std::error::Error for NativeError {}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Remote client library as seen by the connection cache
pub trait RemoteDriver {
    fn client_version(&self) -> ServerVersion;

    /// Create a runtime for one locale and its error context
    fn create_environment(&mut self, locale: &str) -> NativeResult<(EnvHandle, ErrorHandle)>;
    fn free_environment(&mut self, env: EnvHandle, err: ErrorHandle) -> NativeResult<()>;

    fn attach_server(&mut self, env: EnvHandle, connect_string: &str) -> NativeResult<ServerHandle>;
    fn detach_server(&mut self, server: ServerHandle) -> NativeResult<()>;
    fn server_status(&mut self, server: ServerHandle) -> NativeResult<ServerStatus>;
    fn server_version(&mut self, server: ServerHandle) -> NativeResult<ServerVersion>;
    /// Out-of-band interrupt of whatever call is running on `server`
    fn break_server(&mut self, server: ServerHandle) -> NativeResult<()>;

    fn begin_session(
        &mut self,
        server: ServerHandle,
        credentials: &Credentials,
        tags: &SessionTags,
    ) -> NativeResult<(TxnHandle, SessionHandle)>;
    fn end_session(&mut self, server: ServerHandle, session: SessionHandle) -> NativeResult<()>;

    fn start_transaction(&mut self, session: SessionHandle, isolation: IsolationLevel) -> NativeResult<()>;
    fn execute(&mut self, session: SessionHandle, sql: &str) -> NativeResult<()>;
    fn commit(&mut self, session: SessionHandle) -> NativeResult<()>;
    fn rollback(&mut self, session: SessionHandle) -> NativeResult<()>;

    fn allocate(
        &mut self,
        session: SessionHandle,
        kind: HandleKind,
        class: HandleClass,
    ) -> NativeResult<RawHandle>;
    fn release(&mut self, raw: RawHandle, kind: HandleKind, class: HandleClass) -> NativeResult<()>;

    fn describe_type(&mut self, session: SessionHandle, type_name: &str) -> NativeResult<TypeHandle>;
    /// Drop every object pinned in the environment's object cache
    fn free_object_cache(&mut self, env: EnvHandle) -> NativeResult<()>;
}

pub mod error;
pub mod types;

pub use error::{BridgeError, ErrorKind, Result, SERIALIZATION_FAILURE_CODE, USER_CANCEL_CODE};
pub use types::{
    AuthMode, Credentials, EnvHandle, ErrorHandle, HandleClass, HandleKind, IsolationLevel,
    RawHandle, ServerHandle, ServerStatus, ServerVersion, SessionHandle, SessionTags, TxnHandle,
    TypeHandle,
};

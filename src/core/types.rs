use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }
    };
}

native_handle!(
    /// Native runtime environment
    EnvHandle
);
native_handle!(
    /// Native error-reporting context bound to an environment
    ErrorHandle
);
native_handle!(
    /// Physical connection to a remote endpoint
    ServerHandle
);
native_handle!(
    /// Transaction context of an authenticated session
    TxnHandle
);
native_handle!(
    /// Authenticated session
    SessionHandle
);
native_handle!(
    /// Described remote type
    TypeHandle
);
native_handle!(
    /// Transient resource (statement, LOB locator, datetime descriptor)
    RawHandle
);

/// Isolation used when starting the remote transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Serializable,
    ReadCommitted,
    ReadOnly,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::ReadOnly => write!(f, "READ ONLY"),
        }
    }
}

/// Result of a server liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Connected,
    NotConnected,
}

/// Five-part version number as reported by the remote client library
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub update: u32,
    pub patch: u32,
    pub port_update: u32,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32, update: u32, patch: u32, port_update: u32) -> Self {
        Self {
            major,
            minor,
            update,
            patch,
            port_update,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.major, self.minor, self.update, self.patch, self.port_update
        )
    }
}

/// What a transient handle stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Statement,
    LobLocator,
    Timestamp,
    TimestampTz,
    IntervalDayToSecond,
    IntervalYearToMonth,
}

impl HandleKind {
    /// Class this kind is normally allocated as
    pub fn default_class(&self) -> HandleClass {
        match self {
            HandleKind::Statement => HandleClass::Handle,
            _ => HandleClass::Descriptor,
        }
    }
}

/// Native allocation family: plain handles and descriptors are freed differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleClass {
    Handle,
    Descriptor,
}

/// How a session authenticates against the remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Operating-system or wallet based authentication, used for an empty user name
    External,
    /// User name and password
    Password,
}

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        if self.user.is_empty() {
            AuthMode::External
        } else {
            AuthMode::Password
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Observability tags set on every new remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTags {
    pub module: String,
    pub action: String,
}

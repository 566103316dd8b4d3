pub mod cache;
pub mod config;
pub mod environment;
pub mod server;
pub mod session;

use crate::core::{Credentials, EnvHandle, IsolationLevel, ServerHandle, SessionHandle};
use crate::registry::HandleId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use session::SessionId;

pub use cache::CacheManager;
pub use config::{BridgeConfig, FormatSettings};

/// What a caller asks the cache for
///
/// # Examples
///
/// ```
/// use dbbridge::SessionRequest;
///
/// let request = SessionRequest::new("orcl", "scott", "tiger")
///     .nest_level(1)
///     .table_context("emp");
/// assert_eq!(request.nest_level, 1);
/// ```
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Connect string of the remote endpoint
    pub endpoint: String,

    /// Empty user name selects external authentication
    pub credentials: Credentials,

    /// Locale key; the configured default when absent
    pub locale: Option<String>,

    /// Client nesting level the session must reach before it is returned
    pub nest_level: u32,

    /// Table on whose behalf the session is requested, for diagnostics
    pub table_context: Option<String>,

    /// Overrides the configured isolation level
    pub isolation_level: Option<IsolationLevel>,
}

impl SessionRequest {
    pub fn new(endpoint: &str, user: &str, password: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            credentials: Credentials::new(user, password),
            locale: None,
            nest_level: 0,
            table_context: None,
            isolation_level: None,
        }
    }

    /// Set the locale key
    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    /// Set the required nesting level
    pub fn nest_level(mut self, level: u32) -> Self {
        self.nest_level = level;
        self
    }

    /// Set the table context
    pub fn table_context(mut self, table: &str) -> Self {
        self.table_context = Some(table.to_string());
        self
    }

    /// Set the isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }
}

/// Path of a session through the three cache levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub locale: String,
    pub connect_string: String,
    pub user: String,
    pub id: SessionId,
}

/// Caller-visible handle on a cached session
///
/// Cheap to create and discard; it owns nothing but the id of the one
/// statement currently open through it.
#[derive(Debug, Clone)]
pub struct SessionReference {
    pub(crate) key: SessionKey,
    pub(crate) env: EnvHandle,
    pub(crate) server: ServerHandle,
    pub(crate) session: SessionHandle,
    pub(crate) isolation: IsolationLevel,
    pub(crate) statement: Option<HandleId>,
}

impl SessionReference {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn session_id(&self) -> SessionId {
        self.key.id
    }

    pub fn environment(&self) -> EnvHandle {
        self.env
    }

    pub fn server(&self) -> ServerHandle {
        self.server
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Statement currently open through this reference
    pub fn statement(&self) -> Option<HandleId> {
        self.statement
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub environments: usize,
    pub servers: usize,
    pub sessions: usize,
    pub open_handles: usize,
    pub active_transactions: usize,
    pub registered_observers: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache Stats: {} environments, {} servers, {} sessions ({} in transaction), {} open handles, {} observers",
            self.environments,
            self.servers,
            self.sessions,
            self.active_transactions,
            self.open_handles,
            self.registered_observers
        )
    }
}

/// Snapshot of one cached session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub locale: String,
    pub connect_string: String,
    pub user: String,
    pub xact_level: u32,
    pub open_handles: usize,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

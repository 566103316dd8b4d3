use super::session::{SessionEntry, SessionId};
use crate::core::{BridgeError, EnvHandle, Result, ServerHandle, ServerStatus, ServerVersion};
use crate::native::{NativeError, RemoteDriver};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;

/// One physical connection to a remote endpoint
pub struct ServerEntry {
    connect_string: String,
    handle: ServerHandle,
    version: ServerVersion,
    pub(crate) sessions: HashMap<String, SessionEntry>,
    created_at: DateTime<Utc>,
}

impl ServerEntry {
    /// Attach to `connect_string` and read the remote version
    pub(crate) fn attach<D: RemoteDriver>(
        driver: &mut D,
        env: EnvHandle,
        connect_string: &str,
        table_context: Option<&str>,
    ) -> Result<Self> {
        let handle = driver.attach_server(env, connect_string).map_err(|e| {
            BridgeError::connection(connect_failure(connect_string, table_context), Some(e))
        })?;

        let version = match driver.server_version(handle) {
            Ok(version) => version,
            Err(e) => {
                if let Err(detach) = driver.detach_server(handle) {
                    warn!("error detaching from \"{}\": {}", connect_string, detach);
                }
                return Err(BridgeError::reply(
                    format!("error reading server version of \"{}\"", connect_string),
                    e,
                ));
            }
        };

        info!("connected to \"{}\", server version {}", connect_string, version);

        Ok(Self {
            connect_string: connect_string.to_string(),
            handle,
            version,
            sessions: HashMap::new(),
            created_at: Utc::now(),
        })
    }

    pub fn connect_string(&self) -> &str {
        &self.connect_string
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn session(&self, user: &str) -> Option<&SessionEntry> {
        self.sessions.get(user)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionEntry> + '_ {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether any session on this connection is inside a remote transaction
    pub fn has_open_transaction(&self) -> bool {
        self.sessions.values().any(|session| session.xact_level() > 0)
    }

    /// Liveness probe
    pub(crate) fn probe<D: RemoteDriver>(&self, driver: &mut D) -> Result<ServerStatus> {
        driver.server_status(self.handle).map_err(|e| {
            BridgeError::reply(
                format!("error getting server status of \"{}\"", self.connect_string),
                e,
            )
        })
    }

    /// Detach a server whose sessions are already closed
    pub(crate) fn disconnect<D: RemoteDriver>(self, driver: &mut D) -> Result<()> {
        debug!("disconnecting from \"{}\"", self.connect_string);

        driver.detach_server(self.handle).map_err(|e| {
            BridgeError::connection(
                format!("error detaching from \"{}\"", self.connect_string),
                Some(e),
            )
        })
    }

    /// Close every session and detach, logging and discarding failures.
    ///
    /// Returns the ids of the sessions that were closed.
    pub(crate) fn teardown<D: RemoteDriver>(mut self, driver: &mut D) -> Vec<SessionId> {
        let mut closed = Vec::with_capacity(self.sessions.len());

        for (_, session) in self.sessions.drain() {
            closed.push(session.id());
            if let Err(e) = session.close(driver, self.handle) {
                warn!("ignoring error while closing session: {}", e);
            }
        }

        if let Err(e) = driver.detach_server(self.handle) {
            warn!("ignoring error while detaching from \"{}\": {}", self.connect_string, e);
        }
        debug!("tore down connection to \"{}\"", self.connect_string);

        closed
    }
}

/// Error for a connection that went away while remote work was uncommitted
pub(crate) fn transaction_lost(connect_string: &str, detail: Option<NativeError>) -> BridgeError {
    BridgeError::connection(
        format!(
            "connection to foreign server \"{}\" lost during transaction",
            connect_string
        ),
        detail,
    )
}

fn connect_failure(connect_string: &str, table_context: Option<&str>) -> String {
    match table_context {
        Some(table) => format!(
            "cannot connect to foreign server \"{}\" for foreign table \"{}\"",
            connect_string, table
        ),
        None => format!("cannot connect to foreign server \"{}\"", connect_string),
    }
}

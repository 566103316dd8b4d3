use super::config::FormatSettings;
use super::server::ServerEntry;
use super::session::SessionId;
use crate::core::{BridgeError, EnvHandle, ErrorHandle, Result};
use crate::environ;
use crate::native::RemoteDriver;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;

/// One native runtime configured for a locale key
pub struct EnvironmentEntry {
    locale: String,
    handle: EnvHandle,
    error_context: ErrorHandle,
    pub(crate) servers: HashMap<String, ServerEntry>,
    created_at: DateTime<Utc>,
}

impl EnvironmentEntry {
    /// Publish the client variables for `locale` and create its runtime
    pub(crate) fn create<D: RemoteDriver>(
        driver: &mut D,
        locale: &str,
        format: &FormatSettings,
    ) -> Result<Self> {
        environ::apply(locale, format);

        let (handle, error_context) = driver.create_environment(locale).map_err(|e| {
            BridgeError::connection(
                format!("error creating client environment for locale \"{}\"", locale),
                Some(e),
            )
        })?;

        debug!("created environment {:?} for locale \"{}\"", handle, locale);

        Ok(Self {
            locale: locale.to_string(),
            handle,
            error_context,
            servers: HashMap::new(),
            created_at: Utc::now(),
        })
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn handle(&self) -> EnvHandle {
        self.handle
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn server(&self, connect_string: &str) -> Option<&ServerEntry> {
        self.servers.get(connect_string)
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerEntry> + '_ {
        self.servers.values()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Tear down every server and free the runtime, ignoring failures.
    ///
    /// Returns the ids of the sessions that went away with it.
    pub(crate) fn release<D: RemoteDriver>(mut self, driver: &mut D) -> Vec<SessionId> {
        let mut closed = Vec::new();
        for (_, server) in self.servers.drain() {
            closed.extend(server.teardown(driver));
        }

        if let Err(e) = driver.free_environment(self.handle, self.error_context) {
            warn!("error freeing environment for locale \"{}\": {}", self.locale, e);
        }
        debug!("released environment for locale \"{}\"", self.locale);

        closed
    }
}

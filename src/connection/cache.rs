use super::config::BridgeConfig;
use super::environment::EnvironmentEntry;
use super::server::{ServerEntry, transaction_lost};
use super::session::SessionEntry;
use super::{CacheStats, SessionInfo, SessionKey, SessionReference, SessionRequest};
use crate::core::{
    BridgeError, EnvHandle, HandleClass, HandleKind, IsolationLevel, RawHandle, Result,
    ServerHandle, ServerStatus, ServerVersion, SessionTags, TypeHandle,
};
use crate::native::RemoteDriver;
use crate::registry::HandleId;
use crate::transaction::{ObserverRegistry, RetryPolicy, TransactionObserver, bridge};
use log::{debug, info, warn};
use std::collections::HashMap;
use tracing::info_span;

/// Process-lifetime cache of environments, server connections and sessions
///
/// ```text
/// locale ──> EnvironmentEntry
///              └─ connect string ──> ServerEntry
///                                      └─ user ──> SessionEntry
/// ```
///
/// One instance serves one worker; nothing in it is synchronized. Wrap it in
/// [`BridgeClient`](crate::client::BridgeClient) to share it between tasks.
pub struct CacheManager<D: RemoteDriver> {
    driver: D,
    config: BridgeConfig,
    retry: RetryPolicy,
    environments: HashMap<String, EnvironmentEntry>,
    observers: ObserverRegistry,
}

/// A session resolved through all three levels
struct Located<'a, D> {
    driver: &'a mut D,
    env: EnvHandle,
    server: ServerHandle,
    session: &'a mut SessionEntry,
}

fn stale(key: &SessionKey) -> BridgeError {
    BridgeError::Internal(format!(
        "{} of \"{}\" on \"{}\" is no longer cached",
        key.id, key.user, key.connect_string
    ))
}

impl<D: RemoteDriver> CacheManager<D> {
    pub fn new(driver: D) -> Self {
        let config = BridgeConfig::default();
        Self {
            driver,
            retry: RetryPolicy::from_config(&config),
            config,
            environments: HashMap::new(),
            observers: ObserverRegistry::new(),
        }
    }

    pub fn with_config(driver: D, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            driver,
            retry: RetryPolicy::from_config(&config),
            config,
            environments: HashMap::new(),
            observers: ObserverRegistry::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn client_version(&self) -> ServerVersion {
        self.driver.client_version()
    }

    // ------------------------------------------------------------------------
    // Cache levels
    // ------------------------------------------------------------------------

    /// Environment for `locale`, created on first use
    pub fn acquire_environment(&mut self, locale: &str) -> Result<EnvHandle> {
        if let Some(env) = self.environments.get(locale) {
            return Ok(env.handle());
        }

        let entry = EnvironmentEntry::create(&mut self.driver, locale, &self.config.format)?;
        let handle = entry.handle();
        self.environments.insert(locale.to_string(), entry);
        info!("new environment for locale \"{}\"", locale);
        Ok(handle)
    }

    /// Live server connection for `connect_string` under `locale`.
    ///
    /// A cached connection is probed first; a dead one is torn down with all
    /// its sessions before a new one is attached. If one of those sessions had
    /// an open remote transaction, its work is gone and the teardown is
    /// reported as a connection error instead.
    pub fn acquire_server(
        &mut self,
        locale: &str,
        connect_string: &str,
        table_context: Option<&str>,
    ) -> Result<ServerHandle> {
        let Self {
            driver,
            environments,
            observers,
            ..
        } = self;
        let env = environments.get_mut(locale).ok_or_else(|| {
            BridgeError::Internal(format!("environment for locale \"{}\" is not cached", locale))
        })?;

        let status = match env.servers.get(connect_string) {
            Some(server) => Some(server.probe(driver)?),
            None => None,
        };

        match status {
            Some(ServerStatus::Connected) => {
                if let Some(server) = env.servers.get(connect_string) {
                    return Ok(server.handle());
                }
            }
            Some(ServerStatus::NotConnected) => {
                info!("connection to \"{}\" is gone, reconnecting", connect_string);
                if let Some(server) = env.servers.remove(connect_string) {
                    let lost = server.has_open_transaction();
                    for id in server.teardown(driver) {
                        observers.unregister(id);
                    }
                    if lost {
                        return Err(transaction_lost(connect_string, None));
                    }
                }
            }
            None => {}
        }

        let entry = ServerEntry::attach(driver, env.handle(), connect_string, table_context)?;
        let handle = entry.handle();
        env.servers.insert(connect_string.to_string(), entry);
        Ok(handle)
    }

    /// Session of the requesting user on an already acquired server
    fn acquire_session_entry(&mut self, locale: &str, request: &SessionRequest) -> Result<SessionKey> {
        let tags = SessionTags {
            module: self.config.module_tag.clone(),
            action: self.config.action_tag.clone(),
        };
        let Self {
            driver,
            environments,
            observers,
            ..
        } = self;
        let server = environments
            .get_mut(locale)
            .and_then(|env| env.servers.get_mut(&request.endpoint))
            .ok_or_else(|| {
                BridgeError::Internal(format!("server \"{}\" is not cached", request.endpoint))
            })?;

        let user = &request.credentials.user;
        if let Some(session) = server.sessions.get_mut(user) {
            session.touch();
            return Ok(SessionKey {
                locale: locale.to_string(),
                connect_string: request.endpoint.clone(),
                user: user.clone(),
                id: session.id(),
            });
        }

        let entry = SessionEntry::authenticate(
            driver,
            server.handle(),
            &request.credentials,
            &tags,
            request.table_context.as_deref(),
        )?;
        let key = SessionKey {
            locale: locale.to_string(),
            connect_string: request.endpoint.clone(),
            user: user.clone(),
            id: entry.id(),
        };
        server.sessions.insert(user.clone(), entry);
        observers.register(key.clone());
        Ok(key)
    }

    fn resolve(&mut self, locale: &str, request: &SessionRequest) -> Result<SessionKey> {
        self.acquire_environment(locale)?;
        self.acquire_server(locale, &request.endpoint, request.table_context.as_deref())?;
        self.acquire_session_entry(locale, request)
    }

    /// Resolve, connect and bring the session to the requested nesting level.
    ///
    /// If starting the remote transaction fails because the session turned out
    /// to be dead, the server connection is dropped and the whole sequence runs
    /// once more on a fresh connection. No retry happens when dropping the
    /// connection discarded another session's open transaction.
    pub fn acquire_session(&mut self, request: &SessionRequest) -> Result<SessionReference> {
        let span = info_span!(
            "acquire_session",
            endpoint = %request.endpoint,
            user = %request.credentials.user,
            nest_level = request.nest_level
        );
        let _entered = span.enter();

        let locale = request
            .locale
            .clone()
            .unwrap_or_else(|| self.config.default_locale.clone());
        let isolation = request.isolation_level.unwrap_or(self.config.isolation_level);
        let max_retries = self.retry.max_retries();

        for attempt in 0..=max_retries {
            let key = self.resolve(&locale, request)?;

            let advanced = self.locate(&key).and_then(|located| {
                bridge::begin_or_advance(located.driver, located.session, request.nest_level, isolation)
            });

            let err = match advanced {
                Ok(()) => return self.reference(&key, isolation),
                Err(err) => err,
            };

            let starting = self
                .locate_ref(&key)
                .map(|session| session.xact_level() == 0)
                .unwrap_or(false);

            if attempt < max_retries && starting && self.retry.is_retryable(&err) {
                warn!(
                    "session on \"{}\" was terminated ({}), reconnecting",
                    request.endpoint, err
                );
                if self.drop_server_silently(&locale, &request.endpoint) {
                    return Err(transaction_lost(&request.endpoint, err.detail().cloned()));
                }
                continue;
            }

            if attempt > 0 {
                return Err(self.retry.exhausted(&request.endpoint, err));
            }
            return Err(err);
        }

        Err(BridgeError::Internal(
            "session acquisition ended without a result".into(),
        ))
    }

    fn reference(&mut self, key: &SessionKey, isolation: IsolationLevel) -> Result<SessionReference> {
        let located = self.locate(key)?;
        Ok(SessionReference {
            key: key.clone(),
            env: located.env,
            server: located.server,
            session: located.session.handle(),
            isolation,
            statement: None,
        })
    }

    fn locate(&mut self, key: &SessionKey) -> Result<Located<'_, D>> {
        let Self {
            driver,
            environments,
            ..
        } = self;
        let env = environments.get_mut(&key.locale).ok_or_else(|| stale(key))?;
        let env_handle = env.handle();
        let server = env
            .servers
            .get_mut(&key.connect_string)
            .ok_or_else(|| stale(key))?;
        let server_handle = server.handle();
        let session = server
            .sessions
            .get_mut(&key.user)
            .filter(|session| session.id() == key.id)
            .ok_or_else(|| stale(key))?;

        Ok(Located {
            driver,
            env: env_handle,
            server: server_handle,
            session,
        })
    }

    fn locate_ref(&self, key: &SessionKey) -> Result<&SessionEntry> {
        self.environments
            .get(&key.locale)
            .and_then(|env| env.server(&key.connect_string))
            .and_then(|server| server.session(&key.user))
            .filter(|session| session.id() == key.id)
            .ok_or_else(|| stale(key))
    }

    /// Tear a server down without reporting errors.
    ///
    /// Returns true if one of its sessions had an open remote transaction.
    fn drop_server_silently(&mut self, locale: &str, connect_string: &str) -> bool {
        let Self {
            driver,
            environments,
            observers,
            ..
        } = self;
        let Some(server) = environments
            .get_mut(locale)
            .and_then(|env| env.servers.remove(connect_string))
        else {
            return false;
        };

        let lost = server.has_open_transaction();
        for id in server.teardown(driver) {
            observers.unregister(id);
        }
        lost
    }

    // ------------------------------------------------------------------------
    // Transaction bridge
    // ------------------------------------------------------------------------

    pub fn begin_or_advance(&mut self, sref: &SessionReference, target: u32) -> Result<()> {
        let located = self.locate(&sref.key)?;
        bridge::begin_or_advance(located.driver, located.session, target, sref.isolation)
    }

    pub fn end_subtransaction(&mut self, sref: &SessionReference, nest_level: u32, commit: bool) -> Result<()> {
        let located = self.locate(&sref.key)?;
        bridge::end_subtransaction(located.driver, located.session, nest_level, commit)
    }

    pub fn end_transaction(&mut self, sref: &SessionReference, commit: bool, suppress_errors: bool) -> Result<()> {
        let located = self.locate(&sref.key)?;
        bridge::end_transaction(located.driver, located.env, located.session, commit, suppress_errors)
    }

    pub fn xact_level(&self, sref: &SessionReference) -> Result<u32> {
        self.locate_ref(&sref.key).map(|session| session.xact_level())
    }

    /// Deliver transaction events to this session
    pub fn register_transaction_callback(&mut self, sref: &SessionReference) -> Result<bool> {
        self.locate_ref(&sref.key)?;
        Ok(self.observers.register(sref.key.clone()))
    }

    pub fn unregister_transaction_callback(&mut self, sref: &SessionReference) -> bool {
        self.observers.unregister(sref.key.id)
    }

    pub fn is_registered(&self, sref: &SessionReference) -> bool {
        self.observers.contains(sref.key.id)
    }

    // ------------------------------------------------------------------------
    // Handle registry
    // ------------------------------------------------------------------------

    pub fn allocate_handle(
        &mut self,
        sref: &SessionReference,
        kind: HandleKind,
        class: HandleClass,
    ) -> Result<HandleId> {
        let located = self.locate(&sref.key)?;
        located.session.allocate_handle(located.driver, kind, class)
    }

    pub fn free_handle(&mut self, sref: &SessionReference, id: HandleId) -> Result<()> {
        let located = self.locate(&sref.key)?;
        located.session.free_handle(located.driver, id)
    }

    pub fn raw_handle(&self, sref: &SessionReference, id: HandleId) -> Result<RawHandle> {
        self.locate_ref(&sref.key)?.raw_handle(id)
    }

    pub fn open_handle_count(&self, sref: &SessionReference) -> Result<usize> {
        self.locate_ref(&sref.key).map(|session| session.open_handle_count())
    }

    /// Allocate the reference's single current statement
    pub fn open_statement(&mut self, sref: &mut SessionReference) -> Result<HandleId> {
        let located = self.locate(&sref.key)?;

        if let Some(statement) = sref.statement {
            if located.session.handles.contains(statement) {
                return Err(BridgeError::Internal(format!(
                    "statement {} is already open on {}",
                    statement, sref.key.id
                )));
            }
        }

        let id = located
            .session
            .allocate_handle(located.driver, HandleKind::Statement, HandleClass::Handle)?;
        sref.statement = Some(id);
        Ok(id)
    }

    /// Free the reference's current statement, if any
    pub fn close_statement(&mut self, sref: &mut SessionReference) -> Result<()> {
        let Some(statement) = sref.statement.take() else {
            return Ok(());
        };

        let located = self.locate(&sref.key)?;
        if located.session.handles.contains(statement) {
            located.session.free_handle(located.driver, statement)
        } else {
            // freed with the rest of the transaction's handles
            debug!("statement {} was already released", statement);
            Ok(())
        }
    }

    pub fn is_statement_open(&self, sref: &SessionReference) -> bool {
        match (sref.statement, self.locate_ref(&sref.key)) {
            (Some(statement), Ok(session)) => session.handles.contains(statement),
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Miscellaneous session operations
    // ------------------------------------------------------------------------

    /// Interrupt the call currently running on the session's server
    pub fn cancel(&mut self, sref: &SessionReference) -> Result<()> {
        let located = self.locate(&sref.key)?;
        located
            .driver
            .break_server(located.server)
            .map_err(|e| BridgeError::execution("error cancelling remote call", e))
    }

    /// Remote type description, looked up once per session
    pub fn type_descriptor(&mut self, sref: &SessionReference, type_name: &str) -> Result<TypeHandle> {
        let located = self.locate(&sref.key)?;
        located.session.type_descriptor(located.driver, type_name)
    }

    pub fn server_version(&self, sref: &SessionReference) -> Result<ServerVersion> {
        self.environments
            .get(&sref.key.locale)
            .and_then(|env| env.server(&sref.key.connect_string))
            .map(|server| server.version())
            .ok_or_else(|| stale(&sref.key))
    }

    /// Log the session off; with `disconnect` also drop its server once unused
    pub fn close_session(&mut self, sref: SessionReference, disconnect: bool) -> Result<()> {
        let key = sref.key;
        {
            let located = self.locate(&key)?;
            if located.session.xact_level() > 0 {
                bridge::end_transaction(located.driver, located.env, located.session, false, true)?;
            }
        }

        let Self {
            driver,
            environments,
            observers,
            ..
        } = self;
        let env = environments.get_mut(&key.locale).ok_or_else(|| stale(&key))?;
        let server = env
            .servers
            .get_mut(&key.connect_string)
            .ok_or_else(|| stale(&key))?;
        let session = server.sessions.remove(&key.user).ok_or_else(|| stale(&key))?;

        observers.unregister(session.id());
        let closed = session.close(driver, server.handle());

        let disconnected = if disconnect && server.sessions.is_empty() {
            match env.servers.remove(&key.connect_string) {
                Some(server) => server.disconnect(driver),
                None => Ok(()),
            }
        } else {
            Ok(())
        };

        closed.and(disconnected)
    }

    /// Close every session of a server and detach from it
    pub fn disconnect_server(&mut self, locale: &str, connect_string: &str) -> Result<()> {
        for key in self.session_keys() {
            if key.locale != locale || key.connect_string != connect_string {
                continue;
            }
            if let Ok(located) = self.locate(&key) {
                bridge::end_transaction(located.driver, located.env, located.session, false, true)?;
            }
        }

        let Self {
            driver,
            environments,
            observers,
            ..
        } = self;
        let Some(mut server) = environments
            .get_mut(locale)
            .and_then(|env| env.servers.remove(connect_string))
        else {
            return Ok(());
        };

        let mut first_error = None;
        let handle = server.handle();
        for (_, session) in server.sessions.drain() {
            observers.unregister(session.id());
            if let Err(err) = session.close(driver, handle) {
                first_error.get_or_insert(err);
            }
        }

        let detached = server.disconnect(driver);
        match first_error {
            Some(err) => Err(err),
            None => detached,
        }
    }

    /// Roll back, log off and release everything. Safe to call repeatedly.
    pub fn shutdown_all(&mut self) {
        if self.environments.is_empty() {
            return;
        }
        info!("shutting down connection cache");

        for key in self.session_keys() {
            if let Ok(located) = self.locate(&key) {
                if let Err(err) =
                    bridge::end_transaction(located.driver, located.env, located.session, false, true)
                {
                    warn!("error rolling back {} at shutdown: {}", key.id, err);
                }
            }
        }

        let Self {
            driver,
            environments,
            observers,
            ..
        } = self;
        for (_, env) in environments.drain() {
            for id in env.release(driver) {
                observers.unregister(id);
            }
        }
        observers.clear();
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn environment(&self, locale: &str) -> Option<&EnvironmentEntry> {
        self.environments.get(locale)
    }

    pub fn environment_count(&self) -> usize {
        self.environments.len()
    }

    pub fn server_count(&self) -> usize {
        self.environments.values().map(|env| env.server_count()).sum()
    }

    pub fn session_count(&self) -> usize {
        self.environments
            .values()
            .flat_map(|env| env.servers())
            .map(|server| server.session_count())
            .sum()
    }

    pub fn has_session(&self, locale: &str, connect_string: &str, user: &str) -> bool {
        self.environments
            .get(locale)
            .and_then(|env| env.server(connect_string))
            .and_then(|server| server.session(user))
            .is_some()
    }

    fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys = Vec::new();
        for env in self.environments.values() {
            for server in env.servers() {
                for session in server.sessions() {
                    keys.push(SessionKey {
                        locale: env.locale().to_string(),
                        connect_string: server.connect_string().to_string(),
                        user: session.user().to_string(),
                        id: session.id(),
                    });
                }
            }
        }
        keys
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for env in self.environments.values() {
            for server in env.servers() {
                for session in server.sessions() {
                    infos.push(SessionInfo {
                        id: session.id().as_u64(),
                        locale: env.locale().to_string(),
                        connect_string: server.connect_string().to_string(),
                        user: session.user().to_string(),
                        xact_level: session.xact_level(),
                        open_handles: session.open_handle_count(),
                        created_at: session.created_at(),
                        last_used: session.last_used(),
                    });
                }
            }
        }
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            environments: self.environments.len(),
            registered_observers: self.observers.len(),
            ..CacheStats::default()
        };

        for env in self.environments.values() {
            stats.servers += env.server_count();
            for server in env.servers() {
                stats.sessions += server.session_count();
                for session in server.sessions() {
                    stats.open_handles += session.open_handle_count();
                    if session.state().is_active() {
                        stats.active_transactions += 1;
                    }
                }
            }
        }
        stats
    }
}

impl<D: RemoteDriver> TransactionObserver for CacheManager<D> {
    fn on_subtransaction_end(&mut self, nest_level: u32, commit: bool) -> Result<()> {
        let mut first_error = None;

        for key in self.observers.keys() {
            let result = self.locate(&key).and_then(|located| {
                bridge::end_subtransaction(located.driver, located.session, nest_level, commit)
            });

            if let Err(err) = result {
                if commit {
                    return Err(err);
                }
                warn!("error aborting subtransaction on {}: {}", key.id, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_top_level_end(&mut self, commit: bool) -> Result<()> {
        for key in self.observers.keys() {
            // an abort must reach every session, so its errors are suppressed
            let result = self.locate(&key).and_then(|located| {
                bridge::end_transaction(located.driver, located.env, located.session, commit, !commit)
            });

            if let Err(err) = result {
                if commit {
                    return Err(err);
                }
                warn!("error aborting transaction on {}: {}", key.id, err);
            }
        }
        Ok(())
    }
}

impl<D: RemoteDriver> Drop for CacheManager<D> {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{DriverOp, LoopbackDriver};

    fn cache() -> CacheManager<LoopbackDriver> {
        CacheManager::new(LoopbackDriver::new().with_account("scott", "tiger"))
    }

    #[test]
    fn test_new_session_is_registered() {
        let mut cache = cache();
        let sref = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

        assert!(cache.is_registered(&sref));
        assert_eq!(cache.xact_level(&sref).unwrap(), 0);
        assert_eq!(cache.driver().count(DriverOp::StartTransaction), 0);
    }

    #[test]
    fn test_stale_reference_is_internal_error() {
        let mut cache = cache();
        let sref = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
        cache.close_session(sref.clone(), false).unwrap();

        let err = cache.begin_or_advance(&sref, 1).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_drop_releases_everything() {
        let mut cache = cache();
        let sref = cache
            .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
            .unwrap();
        cache
            .allocate_handle(&sref, HandleKind::LobLocator, HandleClass::Descriptor)
            .unwrap();

        cache.shutdown_all();
        assert_eq!(cache.driver().live_handle_count(), 0);
        assert_eq!(cache.driver().open_session_count(), 0);
        assert_eq!(cache.driver().attached_server_count(), 0);
        assert_eq!(cache.driver().environment_count(), 0);
    }
}

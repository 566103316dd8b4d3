//! In-process remote server.
//!
//! `LoopbackDriver` implements [`RemoteDriver`] without a network: it keeps
//! accounts, attached servers, sessions, transactions and savepoints in memory,
//! journals every call it receives and can be told to fail specific calls.
//! Tests and the demo binary run the cache against it.

use super::{NativeError, NativeResult, RemoteDriver};
use crate::core::{
    AuthMode, Credentials, EnvHandle, ErrorHandle, HandleClass, HandleKind, IsolationLevel,
    RawHandle, ServerHandle, ServerStatus, ServerVersion, SessionHandle, SessionTags, TxnHandle,
    TypeHandle,
};
use crate::environ;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};

lazy_static! {
    static ref SAVEPOINT_SQL: Regex =
        Regex::new(r"(?i)^\s*SAVEPOINT\s+(\w+)\s*$").expect("valid savepoint pattern");
    static ref ROLLBACK_TO_SQL: Regex =
        Regex::new(r"(?i)^\s*ROLLBACK\s+TO\s+SAVEPOINT\s+(\w+)\s*$").expect("valid rollback pattern");
}

/// Cost factor for account hashes; the loopback server only needs to be correct, not slow
const HASH_COST: u32 = 4;

/// Operation selector for fault injection and journal counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    CreateEnvironment,
    FreeEnvironment,
    AttachServer,
    DetachServer,
    ServerStatus,
    ServerVersion,
    BreakServer,
    BeginSession,
    EndSession,
    StartTransaction,
    Execute,
    Commit,
    Rollback,
    Allocate,
    Release,
    DescribeType,
    FreeObjectCache,
}

/// One call received by the loopback server, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    CreateEnvironment { locale: String, nls_lang: Option<String> },
    FreeEnvironment,
    AttachServer { connect_string: String },
    DetachServer { connect_string: String },
    ServerStatus { connect_string: String },
    ServerVersion,
    BreakServer,
    BeginSession { user: String, auth: AuthMode, module: String, action: String },
    EndSession { user: String },
    StartTransaction { user: String, isolation: IsolationLevel },
    Execute { user: String, sql: String },
    Commit { user: String },
    Rollback { user: String },
    Allocate { kind: HandleKind },
    Release { kind: HandleKind },
    DescribeType { name: String },
    FreeObjectCache,
}

impl DriverCall {
    pub fn op(&self) -> DriverOp {
        match self {
            DriverCall::CreateEnvironment { .. } => DriverOp::CreateEnvironment,
            DriverCall::FreeEnvironment => DriverOp::FreeEnvironment,
            DriverCall::AttachServer { .. } => DriverOp::AttachServer,
            DriverCall::DetachServer { .. } => DriverOp::DetachServer,
            DriverCall::ServerStatus { .. } => DriverOp::ServerStatus,
            DriverCall::ServerVersion => DriverOp::ServerVersion,
            DriverCall::BreakServer => DriverOp::BreakServer,
            DriverCall::BeginSession { .. } => DriverOp::BeginSession,
            DriverCall::EndSession { .. } => DriverOp::EndSession,
            DriverCall::StartTransaction { .. } => DriverOp::StartTransaction,
            DriverCall::Execute { .. } => DriverOp::Execute,
            DriverCall::Commit { .. } => DriverOp::Commit,
            DriverCall::Rollback { .. } => DriverOp::Rollback,
            DriverCall::Allocate { .. } => DriverOp::Allocate,
            DriverCall::Release { .. } => DriverOp::Release,
            DriverCall::DescribeType { .. } => DriverOp::DescribeType,
            DriverCall::FreeObjectCache => DriverOp::FreeObjectCache,
        }
    }
}

struct RemoteServer {
    connect_string: String,
    connected: bool,
}

struct RemoteSession {
    server: u64,
    user: String,
    in_transaction: bool,
    isolation: Option<IsolationLevel>,
    savepoints: Vec<String>,
}

pub struct LoopbackDriver {
    next_handle: u64,
    accounts: HashMap<String, String>,
    allow_external: bool,
    server_version: ServerVersion,
    environments: HashSet<u64>,
    servers: HashMap<u64, RemoteServer>,
    sessions: HashMap<u64, RemoteSession>,
    live_handles: HashMap<u64, (HandleKind, HandleClass)>,
    refused: HashSet<String>,
    faults: HashMap<DriverOp, VecDeque<NativeError>>,
    journal: Vec<DriverCall>,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            accounts: HashMap::new(),
            allow_external: true,
            server_version: ServerVersion::new(19, 3, 0, 0, 0),
            environments: HashSet::new(),
            servers: HashMap::new(),
            sessions: HashMap::new(),
            live_handles: HashMap::new(),
            refused: HashSet::new(),
            faults: HashMap::new(),
            journal: Vec::new(),
        }
    }

    /// Add an account that password authentication accepts
    pub fn with_account(mut self, user: &str, password: &str) -> Self {
        let hash = bcrypt::hash(password, HASH_COST).expect("Failed to hash password");
        self.accounts.insert(user.to_string(), hash);
        self
    }

    pub fn with_external_auth(mut self, allow: bool) -> Self {
        self.allow_external = allow;
        self
    }

    pub fn with_server_version(mut self, version: ServerVersion) -> Self {
        self.server_version = version;
        self
    }

    /// Make the next call of `op` fail with `code`
    pub fn fail_next(&mut self, op: DriverOp, code: i32, message: &str) {
        self.faults
            .entry(op)
            .or_default()
            .push_back(NativeError::new(code, message));
    }

    /// Make attaching to `connect_string` fail until [`accept_endpoint`](Self::accept_endpoint)
    pub fn refuse_endpoint(&mut self, connect_string: &str) {
        self.refused.insert(connect_string.to_string());
    }

    pub fn accept_endpoint(&mut self, connect_string: &str) {
        self.refused.remove(connect_string);
    }

    /// Simulate the network dropping every connection to `connect_string`
    pub fn drop_connections(&mut self, connect_string: &str) {
        for server in self.servers.values_mut() {
            if server.connect_string == connect_string {
                server.connected = false;
            }
        }
    }

    pub fn journal(&self) -> &[DriverCall] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Number of journaled calls of `op`
    pub fn count(&self, op: DriverOp) -> usize {
        self.journal.iter().filter(|c| c.op() == op).count()
    }

    /// SQL text executed so far, in order
    pub fn executed_sql(&self) -> Vec<String> {
        self.journal
            .iter()
            .filter_map(|c| match c {
                DriverCall::Execute { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live_handle_count(&self) -> usize {
        self.live_handles.len()
    }

    pub fn environment_count(&self) -> usize {
        self.environments.len()
    }

    pub fn attached_server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether any session of `user` has an open remote transaction
    pub fn in_transaction(&self, user: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.user == user && s.in_transaction)
    }

    /// Savepoints currently established by `user`'s session
    pub fn savepoints(&self, user: &str) -> Vec<String> {
        self.sessions
            .values()
            .find(|s| s.user == user)
            .map(|s| s.savepoints.clone())
            .unwrap_or_default()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn take_fault(&mut self, op: DriverOp) -> NativeResult<()> {
        match self.faults.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn connect_string_of(&self, server: ServerHandle) -> String {
        self.servers
            .get(&server.0)
            .map(|s| s.connect_string.clone())
            .unwrap_or_default()
    }

    fn user_of(&self, session: SessionHandle) -> String {
        self.sessions
            .get(&session.0)
            .map(|s| s.user.clone())
            .unwrap_or_default()
    }

    /// Resolve a session whose server link is still up
    fn live_session(&mut self, session: SessionHandle) -> NativeResult<&mut RemoteSession> {
        let server = self
            .sessions
            .get(&session.0)
            .map(|s| s.server)
            .ok_or_else(|| NativeError::new(1012, "not logged on"))?;

        let connected = self.servers.get(&server).map(|s| s.connected).unwrap_or(false);
        if !connected {
            return Err(NativeError::new(3113, "end-of-file on communication channel"));
        }

        self.sessions
            .get_mut(&session.0)
            .ok_or_else(|| NativeError::new(1012, "not logged on"))
    }

    fn verify_password(&self, user: &str, password: &str) -> bool {
        self.accounts
            .get(user)
            .map(|hash| bcrypt::verify(password, hash).unwrap_or(false))
            .unwrap_or(false)
    }
}

impl RemoteDriver for LoopbackDriver {
    fn client_version(&self) -> ServerVersion {
        ServerVersion::new(19, 3, 0, 0, 0)
    }

    fn create_environment(&mut self, locale: &str) -> NativeResult<(EnvHandle, ErrorHandle)> {
        self.journal.push(DriverCall::CreateEnvironment {
            locale: locale.to_string(),
            nls_lang: environ::get("NLS_LANG"),
        });
        self.take_fault(DriverOp::CreateEnvironment)?;

        let env = self.next_id();
        let err = self.next_id();
        self.environments.insert(env);
        Ok((EnvHandle(env), ErrorHandle(err)))
    }

    fn free_environment(&mut self, env: EnvHandle, _err: ErrorHandle) -> NativeResult<()> {
        self.journal.push(DriverCall::FreeEnvironment);
        self.take_fault(DriverOp::FreeEnvironment)?;
        self.environments.remove(&env.0);
        Ok(())
    }

    fn attach_server(&mut self, env: EnvHandle, connect_string: &str) -> NativeResult<ServerHandle> {
        self.journal.push(DriverCall::AttachServer {
            connect_string: connect_string.to_string(),
        });
        self.take_fault(DriverOp::AttachServer)?;

        if !self.environments.contains(&env.0) {
            return Err(NativeError::new(24315, "illegal attribute type"));
        }
        if self.refused.contains(connect_string) {
            return Err(NativeError::new(12541, "TNS:no listener"));
        }

        let id = self.next_id();
        self.servers.insert(
            id,
            RemoteServer {
                connect_string: connect_string.to_string(),
                connected: true,
            },
        );
        Ok(ServerHandle(id))
    }

    fn detach_server(&mut self, server: ServerHandle) -> NativeResult<()> {
        let connect_string = self.connect_string_of(server);
        self.journal.push(DriverCall::DetachServer { connect_string });
        self.take_fault(DriverOp::DetachServer)?;

        self.servers.remove(&server.0);
        self.sessions.retain(|_, s| s.server != server.0);
        Ok(())
    }

    fn server_status(&mut self, server: ServerHandle) -> NativeResult<ServerStatus> {
        let connect_string = self.connect_string_of(server);
        self.journal.push(DriverCall::ServerStatus { connect_string });
        self.take_fault(DriverOp::ServerStatus)?;

        match self.servers.get(&server.0) {
            Some(s) if s.connected => Ok(ServerStatus::Connected),
            Some(_) => Ok(ServerStatus::NotConnected),
            None => Err(NativeError::new(3114, "not connected to ORACLE")),
        }
    }

    fn server_version(&mut self, server: ServerHandle) -> NativeResult<ServerVersion> {
        self.journal.push(DriverCall::ServerVersion);
        self.take_fault(DriverOp::ServerVersion)?;

        if !self.servers.contains_key(&server.0) {
            return Err(NativeError::new(3114, "not connected to ORACLE"));
        }
        Ok(self.server_version)
    }

    fn break_server(&mut self, _server: ServerHandle) -> NativeResult<()> {
        self.journal.push(DriverCall::BreakServer);
        self.take_fault(DriverOp::BreakServer)
    }

    fn begin_session(
        &mut self,
        server: ServerHandle,
        credentials: &Credentials,
        tags: &SessionTags,
    ) -> NativeResult<(TxnHandle, SessionHandle)> {
        let auth = credentials.auth_mode();
        self.journal.push(DriverCall::BeginSession {
            user: credentials.user.clone(),
            auth,
            module: tags.module.clone(),
            action: tags.action.clone(),
        });
        self.take_fault(DriverOp::BeginSession)?;

        match self.servers.get(&server.0) {
            Some(s) if s.connected => {}
            _ => return Err(NativeError::new(3114, "not connected to ORACLE")),
        }

        let accepted = match auth {
            AuthMode::External => self.allow_external,
            AuthMode::Password => self.verify_password(&credentials.user, &credentials.password),
        };
        if !accepted {
            return Err(NativeError::new(1017, "invalid username/password; logon denied"));
        }

        let txn = self.next_id();
        let session = self.next_id();
        self.sessions.insert(
            session,
            RemoteSession {
                server: server.0,
                user: credentials.user.clone(),
                in_transaction: false,
                isolation: None,
                savepoints: Vec::new(),
            },
        );
        Ok((TxnHandle(txn), SessionHandle(session)))
    }

    fn end_session(&mut self, _server: ServerHandle, session: SessionHandle) -> NativeResult<()> {
        let user = self.user_of(session);
        self.journal.push(DriverCall::EndSession { user });
        self.take_fault(DriverOp::EndSession)?;

        self.sessions
            .remove(&session.0)
            .map(|_| ())
            .ok_or_else(|| NativeError::new(1012, "not logged on"))
    }

    fn start_transaction(&mut self, session: SessionHandle, isolation: IsolationLevel) -> NativeResult<()> {
        let user = self.user_of(session);
        self.journal.push(DriverCall::StartTransaction { user, isolation });
        self.take_fault(DriverOp::StartTransaction)?;

        let remote = self.live_session(session)?;
        if remote.in_transaction {
            return Err(NativeError::new(
                1453,
                "SET TRANSACTION must be first statement of transaction",
            ));
        }
        remote.in_transaction = true;
        remote.isolation = Some(isolation);
        Ok(())
    }

    fn execute(&mut self, session: SessionHandle, sql: &str) -> NativeResult<()> {
        let user = self.user_of(session);
        self.journal.push(DriverCall::Execute {
            user,
            sql: sql.to_string(),
        });
        self.take_fault(DriverOp::Execute)?;

        let remote = self.live_session(session)?;
        if let Some(caps) = SAVEPOINT_SQL.captures(sql) {
            let name = caps[1].to_ascii_lowercase();
            // a reused name moves the savepoint
            remote.savepoints.retain(|s| *s != name);
            remote.savepoints.push(name);
            remote.in_transaction = true;
        } else if let Some(caps) = ROLLBACK_TO_SQL.captures(sql) {
            let name = caps[1].to_ascii_lowercase();
            let position = remote
                .savepoints
                .iter()
                .position(|s| *s == name)
                .ok_or_else(|| {
                    NativeError::new(
                        1086,
                        format!("savepoint '{}' never established in this session or is invalid", name.to_uppercase()),
                    )
                })?;
            remote.savepoints.truncate(position + 1);
        }
        Ok(())
    }

    fn commit(&mut self, session: SessionHandle) -> NativeResult<()> {
        let user = self.user_of(session);
        self.journal.push(DriverCall::Commit { user });
        self.take_fault(DriverOp::Commit)?;

        let remote = self.live_session(session)?;
        remote.in_transaction = false;
        remote.isolation = None;
        remote.savepoints.clear();
        Ok(())
    }

    fn rollback(&mut self, session: SessionHandle) -> NativeResult<()> {
        let user = self.user_of(session);
        self.journal.push(DriverCall::Rollback { user });
        self.take_fault(DriverOp::Rollback)?;

        let remote = self.live_session(session)?;
        remote.in_transaction = false;
        remote.isolation = None;
        remote.savepoints.clear();
        Ok(())
    }

    fn allocate(
        &mut self,
        session: SessionHandle,
        kind: HandleKind,
        class: HandleClass,
    ) -> NativeResult<RawHandle> {
        self.journal.push(DriverCall::Allocate { kind });
        self.take_fault(DriverOp::Allocate)?;

        if !self.sessions.contains_key(&session.0) {
            return Err(NativeError::new(1012, "not logged on"));
        }
        let id = self.next_id();
        self.live_handles.insert(id, (kind, class));
        Ok(RawHandle(id))
    }

    fn release(&mut self, raw: RawHandle, kind: HandleKind, class: HandleClass) -> NativeResult<()> {
        self.journal.push(DriverCall::Release { kind });
        self.take_fault(DriverOp::Release)?;

        match self.live_handles.remove(&raw.0) {
            Some(allocated) if allocated == (kind, class) => Ok(()),
            Some(allocated) => Err(NativeError::new(
                21500,
                format!("handle allocated as {:?} released as {:?}", allocated, (kind, class)),
            )),
            None => Err(NativeError::new(21500, "handle released twice")),
        }
    }

    fn describe_type(&mut self, session: SessionHandle, type_name: &str) -> NativeResult<TypeHandle> {
        self.journal.push(DriverCall::DescribeType {
            name: type_name.to_string(),
        });
        self.take_fault(DriverOp::DescribeType)?;

        self.live_session(session)?;
        Ok(TypeHandle(self.next_id()))
    }

    fn free_object_cache(&mut self, _env: EnvHandle) -> NativeResult<()> {
        self.journal.push(DriverCall::FreeObjectCache);
        self.take_fault(DriverOp::FreeObjectCache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> SessionTags {
        SessionTags {
            module: "test".into(),
            action: "unit".into(),
        }
    }

    fn logged_in(driver: &mut LoopbackDriver) -> SessionHandle {
        let (env, _) = driver.create_environment("AMERICAN_AMERICA.AL32UTF8").unwrap();
        let server = driver.attach_server(env, "orcl").unwrap();
        let (_, session) = driver
            .begin_session(server, &Credentials::new("scott", "tiger"), &tags())
            .unwrap();
        session
    }

    #[test]
    fn test_password_authentication() {
        let mut driver = LoopbackDriver::new().with_account("scott", "tiger");
        let (env, _) = driver.create_environment("C").unwrap();
        let server = driver.attach_server(env, "orcl").unwrap();

        assert!(driver.begin_session(server, &Credentials::new("scott", "tiger"), &tags()).is_ok());
        let err = driver
            .begin_session(server, &Credentials::new("scott", "wrong"), &tags())
            .unwrap_err();
        assert_eq!(err.code, 1017);
    }

    #[test]
    fn test_external_authentication_can_be_disabled() {
        let mut driver = LoopbackDriver::new().with_external_auth(false);
        let (env, _) = driver.create_environment("C").unwrap();
        let server = driver.attach_server(env, "orcl").unwrap();

        assert!(driver.begin_session(server, &Credentials::new("", ""), &tags()).is_err());
    }

    #[test]
    fn test_savepoint_rollback_truncates() {
        let mut driver = LoopbackDriver::new().with_account("scott", "tiger");
        let session = logged_in(&mut driver);

        driver.start_transaction(session, IsolationLevel::Serializable).unwrap();
        driver.execute(session, "SAVEPOINT s2").unwrap();
        driver.execute(session, "SAVEPOINT s3").unwrap();
        driver.execute(session, "ROLLBACK TO SAVEPOINT s2").unwrap();
        assert_eq!(driver.savepoints("scott"), vec!["s2".to_string()]);

        let err = driver.execute(session, "ROLLBACK TO SAVEPOINT s3").unwrap_err();
        assert_eq!(err.code, 1086);
    }

    #[test]
    fn test_dropped_connection_fails_session_calls() {
        let mut driver = LoopbackDriver::new().with_account("scott", "tiger");
        let session = logged_in(&mut driver);

        driver.drop_connections("orcl");
        let err = driver.start_transaction(session, IsolationLevel::Serializable).unwrap_err();
        assert_eq!(err.code, 3113);
    }

    #[test]
    fn test_fault_injection_fires_once() {
        let mut driver = LoopbackDriver::new();
        driver.fail_next(DriverOp::CreateEnvironment, 1804, "failure to initialize timezone information");

        assert_eq!(driver.create_environment("C").unwrap_err().code, 1804);
        assert!(driver.create_environment("C").is_ok());
        assert_eq!(driver.count(DriverOp::CreateEnvironment), 2);
    }

    #[test]
    fn test_double_release_is_reported() {
        let mut driver = LoopbackDriver::new().with_account("scott", "tiger");
        let session = logged_in(&mut driver);

        let raw = driver
            .allocate(session, HandleKind::LobLocator, HandleClass::Descriptor)
            .unwrap();
        assert_eq!(driver.live_handle_count(), 1);
        driver.release(raw, HandleKind::LobLocator, HandleClass::Descriptor).unwrap();
        assert!(driver.release(raw, HandleKind::LobLocator, HandleClass::Descriptor).is_err());
        assert_eq!(driver.live_handle_count(), 0);
    }
}

use crate::core::{
    BridgeError, Credentials, ErrorKind, HandleClass, HandleKind, RawHandle, Result, ServerHandle,
    SessionHandle, SessionTags, TxnHandle, TypeHandle,
};
use crate::native::RemoteDriver;
use crate::registry::{HandleEntry, HandleId, HandleRegistry};
use crate::transaction::XactState;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a cached session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// One authenticated user on one server connection
pub struct SessionEntry {
    id: SessionId,
    user: String,
    txn: TxnHandle,
    handle: SessionHandle,
    type_cache: HashMap<String, TypeHandle>,
    pub(crate) handles: HandleRegistry,
    /// 0 = no remote transaction, 1 = top level, N = N-1 savepoints
    pub(crate) xact_level: u32,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl SessionEntry {
    /// Log on to `server`
    pub(crate) fn authenticate<D: RemoteDriver>(
        driver: &mut D,
        server: ServerHandle,
        credentials: &Credentials,
        tags: &SessionTags,
        table_context: Option<&str>,
    ) -> Result<Self> {
        let (txn, handle) = driver.begin_session(server, credentials, tags).map_err(|e| {
            let message = match table_context {
                Some(table) => format!(
                    "connection for foreign table \"{}\" cannot be established",
                    table
                ),
                None => format!(
                    "connection for user \"{}\" cannot be established",
                    credentials.user
                ),
            };
            BridgeError::connection(message, Some(e))
        })?;

        let now = Utc::now();
        let entry = Self {
            id: SessionId::next(),
            user: credentials.user.clone(),
            txn,
            handle,
            type_cache: HashMap::new(),
            handles: HandleRegistry::new(),
            xact_level: 0,
            created_at: now,
            last_used: now,
        };
        debug!(
            "{} logged on as \"{}\" ({:?})",
            entry.id,
            entry.user,
            credentials.auth_mode()
        );
        Ok(entry)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn transaction_context(&self) -> TxnHandle {
        self.txn
    }

    pub fn xact_level(&self) -> u32 {
        self.xact_level
    }

    pub fn state(&self) -> XactState {
        XactState::from_level(self.xact_level)
    }

    pub fn open_handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Utc::now();
    }

    /// Allocate a native resource and register it with this session
    pub(crate) fn allocate_handle<D: RemoteDriver>(
        &mut self,
        driver: &mut D,
        kind: HandleKind,
        class: HandleClass,
    ) -> Result<HandleId> {
        let raw = driver.allocate(self.handle, kind, class).map_err(|e| {
            let fallback = match class {
                HandleClass::Handle => ErrorKind::UnableToCreateExecution,
                HandleClass::Descriptor => ErrorKind::OutOfMemory,
            };
            BridgeError::classify(fallback, format!("error allocating {:?} {:?}", kind, class), e)
        })?;

        Ok(self.handles.insert(HandleEntry { raw, kind, class }))
    }

    pub(crate) fn raw_handle(&self, id: HandleId) -> Result<RawHandle> {
        self.handles
            .get(id)
            .map(|entry| entry.raw)
            .ok_or_else(|| BridgeError::Internal(format!("{} is not registered with {}", id, self.id)))
    }

    /// Free one registered handle; an unknown id is a bookkeeping bug
    pub(crate) fn free_handle<D: RemoteDriver>(&mut self, driver: &mut D, id: HandleId) -> Result<()> {
        let entry = self.handles.remove(id).ok_or_else(|| {
            BridgeError::Internal(format!("{} not found in handle registry of {}", id, self.id))
        })?;
        release(driver, &entry);
        Ok(())
    }

    /// Free every registered handle, newest first
    pub(crate) fn free_all_handles<D: RemoteDriver>(&mut self, driver: &mut D) -> usize {
        let mut freed = 0;
        while let Some((_, entry)) = self.handles.pop_latest() {
            release(driver, &entry);
            freed += 1;
        }
        freed
    }

    pub(crate) fn type_descriptor<D: RemoteDriver>(
        &mut self,
        driver: &mut D,
        type_name: &str,
    ) -> Result<TypeHandle> {
        if let Some(handle) = self.type_cache.get(type_name) {
            return Ok(*handle);
        }

        let handle = driver.describe_type(self.handle, type_name).map_err(|e| {
            BridgeError::execution(format!("error describing remote type \"{}\"", type_name), e)
        })?;
        self.type_cache.insert(type_name.to_string(), handle);
        Ok(handle)
    }

    /// Free remaining handles and log off
    pub(crate) fn close<D: RemoteDriver>(mut self, driver: &mut D, server: ServerHandle) -> Result<()> {
        self.free_all_handles(driver);
        self.type_cache.clear();

        driver.end_session(server, self.handle).map_err(|e| {
            BridgeError::connection(format!("error closing session of \"{}\"", self.user), Some(e))
        })?;
        debug!("{} logged off", self.id);
        Ok(())
    }
}

fn release<D: RemoteDriver>(driver: &mut D, entry: &HandleEntry) {
    if let Err(e) = driver.release(entry.raw, entry.kind, entry.class) {
        warn!("error freeing {:?} {:?}: {}", entry.kind, entry.class, e);
    }
}

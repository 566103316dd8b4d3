use crate::connection::SessionKey;
use crate::connection::session::SessionId;
use crate::core::Result;

/// Receiver of the client transaction manager's end-of-(sub)transaction events
///
/// The client calls these at the matching points of its own commit and abort
/// sequence; they are the only coupling between the two transaction managers.
pub trait TransactionObserver {
    /// Subtransaction at `nest_level` is committing or aborting
    fn on_subtransaction_end(&mut self, nest_level: u32, commit: bool) -> Result<()>;

    /// Top-level transaction is committing or aborting
    fn on_top_level_end(&mut self, commit: bool) -> Result<()>;
}

/// Sessions that receive transaction events, in registration order
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    entries: Vec<SessionKey>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`; returns false if it was already registered
    pub fn register(&mut self, key: SessionKey) -> bool {
        if self.contains(key.id) {
            return false;
        }
        self.entries.push(key);
        true
    }

    pub fn unregister(&mut self, id: SessionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|key| key.id != id);
        before != self.entries.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.iter().any(|key| key.id == id)
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Transaction Bridge
// ============================================================================
//
// Maps the client's nested transaction levels onto a single remote
// transaction plus numbered savepoints:
//
// - level 1 starts the remote transaction
// - level N > 1 is SAVEPOINT sN
// - aborting level N is ROLLBACK TO SAVEPOINT sN
// - committing level N releases nothing; the name is reused later
//
// ============================================================================

pub mod bridge;
pub mod observer;
pub mod retry;
pub mod state;

pub use observer::{ObserverRegistry, TransactionObserver};
pub use retry::RetryPolicy;
pub use state::XactState;

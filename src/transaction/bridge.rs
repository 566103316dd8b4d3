use super::state::savepoint_name;
use crate::connection::session::SessionEntry;
use crate::core::{BridgeError, EnvHandle, IsolationLevel, Result};
use crate::native::RemoteDriver;
use tracing::{Level, event};

/// Raise the session to `target` nesting level.
///
/// The first level starts the remote transaction, every further level sets
/// a savepoint named after it.
pub fn begin_or_advance<D: RemoteDriver>(
    driver: &mut D,
    session: &mut SessionEntry,
    target: u32,
    isolation: IsolationLevel,
) -> Result<()> {
    while session.xact_level < target {
        if session.xact_level == 0 {
            driver
                .start_transaction(session.handle(), isolation)
                .map_err(|e| BridgeError::execution("error starting remote transaction", e))?;
            session.xact_level = 1;

            event!(
                Level::DEBUG,
                session = %session.id(),
                isolation = %isolation,
                "remote transaction started"
            );
        } else {
            let name = savepoint_name(session.xact_level + 1);
            driver
                .execute(session.handle(), &format!("SAVEPOINT {}", name))
                .map_err(|e| BridgeError::execution(format!("error setting savepoint {}", name), e))?;
            session.xact_level += 1;

            event!(Level::DEBUG, session = %session.id(), savepoint = %name, "savepoint set");
        }
    }
    Ok(())
}

/// Close nesting level `nest_level`.
///
/// Committed levels need no remote call; aborted ones roll back to their
/// savepoint. Level 1 is the top-level transaction and only ends through
/// [`end_transaction`].
pub fn end_subtransaction<D: RemoteDriver>(
    driver: &mut D,
    session: &mut SessionEntry,
    nest_level: u32,
    commit: bool,
) -> Result<()> {
    if nest_level < 2 {
        return Err(BridgeError::Internal(format!(
            "nesting level {} of {} is not a subtransaction",
            nest_level,
            session.id()
        )));
    }

    if session.xact_level < nest_level {
        return Ok(());
    }

    session.xact_level = nest_level.saturating_sub(1);

    if commit {
        event!(Level::TRACE, session = %session.id(), nest_level, "subtransaction committed");
        return Ok(());
    }

    let name = savepoint_name(nest_level);
    driver
        .execute(session.handle(), &format!("ROLLBACK TO SAVEPOINT {}", name))
        .map_err(|e| {
            BridgeError::execution(format!("error rolling back to savepoint {}", name), e)
        })?;

    event!(Level::DEBUG, session = %session.id(), savepoint = %name, "rolled back to savepoint");
    Ok(())
}

/// Commit or roll back the remote transaction.
///
/// Every handle still registered with the session is freed first. The
/// session is idle afterwards whatever the remote outcome; with
/// `suppress_errors` failures are only logged.
///
/// A commit whose object cache cannot be freed is turned into a rollback and
/// reported as failed, so the remote side never commits work the caller is
/// told was lost.
pub fn end_transaction<D: RemoteDriver>(
    driver: &mut D,
    env: EnvHandle,
    session: &mut SessionEntry,
    commit: bool,
    suppress_errors: bool,
) -> Result<()> {
    if session.xact_level == 0 {
        return Ok(());
    }

    let freed = session.free_all_handles(driver);

    let mut failure = driver
        .free_object_cache(env)
        .err()
        .map(|e| BridgeError::reply("error freeing object cache", e));

    if commit && !suppress_errors {
        if let Some(err) = failure.take() {
            if let Err(e) = driver.rollback(session.handle()) {
                event!(Level::WARN, session = %session.id(), error = %e, "rollback after failed cache free failed");
            }
            session.xact_level = 0;

            event!(
                Level::DEBUG,
                session = %session.id(),
                freed,
                "remote transaction rolled back instead of committed"
            );
            return Err(err);
        }
    }

    let outcome = if commit {
        driver
            .commit(session.handle())
            .map_err(|e| BridgeError::execution("error committing remote transaction", e))
    } else {
        driver
            .rollback(session.handle())
            .map_err(|e| BridgeError::execution("error rolling back remote transaction", e))
    };
    session.xact_level = 0;

    if let Err(err) = outcome {
        failure = Some(err);
    }

    event!(
        Level::DEBUG,
        session = %session.id(),
        commit,
        freed,
        ok = failure.is_none(),
        "remote transaction ended"
    );

    match failure {
        Some(err) if suppress_errors => {
            event!(Level::WARN, session = %session.id(), error = %err, "ignoring error at transaction end");
            Ok(())
        }
        Some(err) => Err(err),
        None => Ok(()),
    }
}

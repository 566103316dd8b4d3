/// Connection cache tests
///
/// Identity of environment, server and session entries, liveness probing,
/// session closing and shutdown.
/// Run with: cargo test --test cache_tests

use dbbridge::connection::config::DEFAULT_LOCALE;
use dbbridge::core::AuthMode;
use dbbridge::native::{DriverCall, DriverOp, LoopbackDriver};
use dbbridge::{CacheManager, CacheStats, ErrorKind, SessionRequest, TransactionObserver};

fn cache() -> CacheManager<LoopbackDriver> {
    CacheManager::new(
        LoopbackDriver::new()
            .with_account("scott", "tiger")
            .with_account("alice", "wonderland"),
    )
}

fn position(driver: &LoopbackDriver, op: DriverOp) -> Option<usize> {
    driver.journal().iter().position(|c| c.op() == op)
}

#[test]
fn test_same_locale_reuses_environment() {
    let mut cache = cache();

    let a = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").locale("AMERICAN_AMERICA.AL32UTF8")).unwrap();
    let b = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").locale("AMERICAN_AMERICA.AL32UTF8")).unwrap();

    assert_eq!(a.environment(), b.environment());
    assert_eq!(cache.environment_count(), 1);
    assert_eq!(cache.driver().count(DriverOp::CreateEnvironment), 1);
}

#[test]
fn test_distinct_locales_get_distinct_environments() {
    let mut cache = cache();

    let a = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").locale("AMERICAN_AMERICA.AL32UTF8")).unwrap();
    let b = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").locale("GERMAN_GERMANY.WE8ISO8859P1")).unwrap();

    assert_ne!(a.environment(), b.environment());
    assert_eq!(cache.environment_count(), 2);
    assert_eq!(cache.driver().count(DriverOp::CreateEnvironment), 2);
    // each environment carries its own server connection
    assert_eq!(cache.server_count(), 2);
}

#[test]
fn test_missing_locale_uses_default() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

    assert!(cache.environment(DEFAULT_LOCALE).is_some());
    match &cache.driver().journal()[0] {
        DriverCall::CreateEnvironment { locale, nls_lang } => {
            assert_eq!(locale, DEFAULT_LOCALE);
            assert!(nls_lang.is_some());
        }
        other => panic!("unexpected first call {:?}", other),
    }
}

#[test]
fn test_server_identity_follows_connect_string() {
    let mut cache = cache();

    let a = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    let b = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    let c = cache.acquire_session(&SessionRequest::new("//db2:1521/sales", "scott", "tiger")).unwrap();

    assert_eq!(a.server(), b.server());
    assert_ne!(a.server(), c.server());
    assert_eq!(a.environment(), c.environment());
    assert_eq!(cache.server_count(), 2);
    assert_eq!(cache.driver().count(DriverOp::AttachServer), 2);
}

#[test]
fn test_session_identity_follows_user() {
    let mut cache = cache();

    let scott = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    let again = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    let alice = cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland")).unwrap();

    assert_eq!(scott.session_id(), again.session_id());
    assert_ne!(scott.session_id(), alice.session_id());
    assert_eq!(scott.server(), alice.server());
    assert_eq!(cache.session_count(), 2);
    // one logon per distinct user
    assert_eq!(cache.driver().count(DriverOp::BeginSession), 2);
}

#[test]
fn test_session_tags_are_sent_on_logon() {
    let config = dbbridge::BridgeConfig::new().module_tag("reports").action_tag("nightly");
    let mut cache = CacheManager::with_config(LoopbackDriver::new().with_account("scott", "tiger"), config).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

    let logon = cache
        .driver()
        .journal()
        .iter()
        .find(|c| c.op() == DriverOp::BeginSession)
        .cloned();
    assert_eq!(
        logon,
        Some(DriverCall::BeginSession {
            user: "scott".into(),
            auth: AuthMode::Password,
            module: "reports".into(),
            action: "nightly".into(),
        })
    );
}

#[test]
fn test_empty_user_authenticates_externally() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "", "")).unwrap();

    assert!(cache.driver().journal().iter().any(|c| matches!(
        c,
        DriverCall::BeginSession { auth: AuthMode::External, .. }
    )));
}

#[test]
fn test_bad_password_is_connection_error() {
    let mut cache = cache();
    let err = cache
        .acquire_session(&SessionRequest::new("orcl", "scott", "wrong").table_context("emp"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("\"emp\""));
    assert_eq!(err.native_code(), Some(1017));
    assert_eq!(cache.session_count(), 0);
    assert_eq!(cache.stats().registered_observers, 0);
}

#[test]
fn test_unreachable_endpoint_is_connection_error() {
    let mut cache = cache();
    cache.driver_mut().refuse_endpoint("nowhere");

    let err = cache
        .acquire_session(&SessionRequest::new("nowhere", "scott", "tiger").table_context("emp"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("nowhere"));
    assert!(err.to_string().contains("emp"));
    assert_eq!(cache.server_count(), 0);

    cache.driver_mut().accept_endpoint("nowhere");
    assert!(cache.acquire_session(&SessionRequest::new("nowhere", "scott", "tiger")).is_ok());
}

#[test]
fn test_environment_failure_is_not_cached() {
    let mut cache = cache();
    cache
        .driver_mut()
        .fail_next(DriverOp::CreateEnvironment, 1804, "failure to initialize timezone information");

    let err = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(cache.environment_count(), 0);

    assert!(cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).is_ok());
}

#[test]
fn test_liveness_probe_on_every_lookup() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

    assert_eq!(cache.driver().count(DriverOp::ServerStatus), 2);
}

#[test]
fn test_dead_server_is_removed_before_reconnecting() {
    let mut cache = cache();
    let old_scott = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland")).unwrap();

    cache.driver_mut().drop_connections("orcl");
    cache.driver_mut().clear_journal();

    let new_scott = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

    let driver = cache.driver();
    let detach = position(driver, DriverOp::DetachServer).unwrap();
    let attach = position(driver, DriverOp::AttachServer).unwrap();
    assert!(detach < attach);
    assert_eq!(driver.count(DriverOp::EndSession), 2);

    assert_ne!(old_scott.server(), new_scott.server());
    assert_ne!(old_scott.session_id(), new_scott.session_id());
    // alice went away with the old connection
    assert_eq!(cache.session_count(), 1);
    assert_eq!(cache.stats().registered_observers, 1);
    assert!(!cache.is_registered(&old_scott));
}

#[test]
fn test_dead_server_with_open_transaction_is_reported() {
    let mut cache = cache();
    let old = cache
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .unwrap();

    cache.driver_mut().drop_connections("orcl");
    let err = cache
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("during transaction"));
    // no second remote transaction was started to hide the loss
    assert_eq!(cache.driver().count(DriverOp::StartTransaction), 1);
    assert_eq!(cache.server_count(), 0);
    assert!(!cache.is_registered(&old));

    // the client's commit reaches nobody, its abort cleans up, and the next
    // transaction gets a fresh connection
    cache.on_top_level_end(false).unwrap();
    let new = cache
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .unwrap();
    assert_ne!(old.server(), new.server());
    assert_eq!(cache.xact_level(&new).unwrap(), 1);
}

#[test]
fn test_failed_status_probe_is_reply_error() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    cache
        .driver_mut()
        .fail_next(DriverOp::ServerStatus, 3114, "not connected to ORACLE");

    let err = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reply);
}

#[test]
fn test_close_session_with_disconnect_drops_unused_server() {
    let mut cache = cache();
    let scott = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    let alice = cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland")).unwrap();

    cache.close_session(scott, true).unwrap();
    assert_eq!(cache.server_count(), 1);
    assert_eq!(cache.driver().count(DriverOp::DetachServer), 0);

    cache.close_session(alice, true).unwrap();
    assert_eq!(cache.server_count(), 0);
    assert_eq!(cache.driver().count(DriverOp::DetachServer), 1);
    assert_eq!(cache.stats().registered_observers, 0);
}

#[test]
fn test_close_session_without_disconnect_keeps_server() {
    let mut cache = cache();
    let scott = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

    cache.close_session(scott, false).unwrap();
    assert_eq!(cache.server_count(), 1);
    assert_eq!(cache.session_count(), 0);
    assert_eq!(cache.driver().open_session_count(), 0);
}

#[test]
fn test_close_session_rolls_back_open_transaction() {
    let mut cache = cache();
    let scott = cache
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(2))
        .unwrap();

    cache.close_session(scott, false).unwrap();
    assert_eq!(cache.driver().count(DriverOp::Rollback), 1);
    assert_eq!(cache.driver().count(DriverOp::Commit), 0);
}

#[test]
fn test_disconnect_server_closes_its_sessions() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland")).unwrap();
    cache.acquire_session(&SessionRequest::new("other", "scott", "tiger")).unwrap();

    cache.disconnect_server(DEFAULT_LOCALE, "orcl").unwrap();
    assert_eq!(cache.server_count(), 1);
    assert_eq!(cache.session_count(), 1);
    assert!(cache.has_session(DEFAULT_LOCALE, "other", "scott"));
    assert_eq!(cache.stats().registered_observers, 1);
}

#[test]
fn test_shutdown_all_is_idempotent() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1)).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland").locale("FRENCH_FRANCE.UTF8")).unwrap();

    cache.shutdown_all();
    assert_eq!(cache.stats(), CacheStats::default());
    assert_eq!(cache.driver().count(DriverOp::Rollback), 1);
    assert_eq!(cache.driver().environment_count(), 0);
    assert_eq!(cache.driver().attached_server_count(), 0);
    assert_eq!(cache.driver().open_session_count(), 0);

    cache.driver_mut().clear_journal();
    cache.shutdown_all();
    assert!(cache.driver().journal().is_empty());
    assert_eq!(cache.stats(), CacheStats::default());
}

#[test]
fn test_shutdown_completes_despite_rollback_failure() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1)).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland").nest_level(1)).unwrap();
    cache
        .driver_mut()
        .fail_next(DriverOp::Rollback, 3113, "end-of-file on communication channel");

    cache.shutdown_all();

    assert_eq!(cache.driver().count(DriverOp::Rollback), 2);
    assert_eq!(cache.stats(), CacheStats::default());
    assert_eq!(cache.driver().open_session_count(), 0);
    assert_eq!(cache.driver().environment_count(), 0);
}

#[test]
fn test_cache_usable_after_shutdown() {
    let mut cache = cache();
    cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();
    cache.shutdown_all();

    let sref = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1)).unwrap();
    assert_eq!(cache.xact_level(&sref).unwrap(), 1);
}

#[test]
fn test_stats_and_session_listing() {
    let mut cache = cache();
    let scott = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1)).unwrap();
    cache.acquire_session(&SessionRequest::new("orcl", "alice", "wonderland")).unwrap();
    cache
        .allocate_handle(&scott, dbbridge::HandleKind::LobLocator, dbbridge::HandleClass::Descriptor)
        .unwrap();

    let stats = cache.stats();
    assert_eq!(stats.environments, 1);
    assert_eq!(stats.servers, 1);
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.open_handles, 1);
    assert_eq!(stats.active_transactions, 1);
    assert_eq!(stats.registered_observers, 2);

    let sessions = cache.sessions();
    assert_eq!(sessions.len(), 2);
    let listed = sessions.iter().find(|s| s.user == "scott").unwrap();
    assert_eq!(listed.xact_level, 1);
    assert_eq!(listed.open_handles, 1);
    assert!(listed.last_used >= listed.created_at);

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"sessions\":2"));
}

#[test]
fn test_server_and_client_versions() {
    let driver = LoopbackDriver::new()
        .with_account("scott", "tiger")
        .with_server_version(dbbridge::core::ServerVersion::new(21, 3, 0, 0, 0));
    let mut cache = CacheManager::new(driver);
    let sref = cache.acquire_session(&SessionRequest::new("orcl", "scott", "tiger")).unwrap();

    assert_eq!(cache.server_version(&sref).unwrap().to_string(), "21.3.0.0.0");
    assert_eq!(cache.client_version().major, 19);
}

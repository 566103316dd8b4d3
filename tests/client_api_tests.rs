/// Client API tests
///
/// Tests for the shared async BridgeClient
/// Run with: cargo test --test client_api_tests
use dbbridge::native::{DriverOp, LoopbackDriver};
use dbbridge::{BridgeClient, BridgeConfig, CacheManager, ErrorKind, HandleKind, SessionRequest};

fn client() -> BridgeClient<LoopbackDriver> {
    BridgeClient::new(
        LoopbackDriver::new()
            .with_account("scott", "tiger")
            .with_account("alice", "wonderland"),
    )
}

#[tokio::test]
async fn test_client_acquire_and_commit() {
    let client = client();

    let sref = client
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .await
        .unwrap();
    assert_eq!(client.xact_level(&sref).await.unwrap(), 1);

    client.end_transaction(&sref, true, false).await.unwrap();
    assert_eq!(client.xact_level(&sref).await.unwrap(), 0);

    let commits = client.with_cache(|cache| cache.driver().count(DriverOp::Commit)).await;
    assert_eq!(commits, 1);
}

#[tokio::test]
async fn test_client_with_config() {
    let config = BridgeConfig::new().retry_on_disconnect(false);
    let mut driver = LoopbackDriver::new().with_account("scott", "tiger");
    driver.fail_next(DriverOp::StartTransaction, 28, "your session has been killed");

    let client = BridgeClient::from_cache(CacheManager::with_config(driver, config).unwrap());
    let err = client
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.native_code(), Some(28));
}

#[tokio::test]
async fn test_client_subtransaction_events() {
    let client = client();
    let sref = client
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .await
        .unwrap();

    client.begin_or_advance(&sref, 3).await.unwrap();
    client.subtransaction_end(3, true).await.unwrap();
    client.subtransaction_end(2, false).await.unwrap();
    assert_eq!(client.xact_level(&sref).await.unwrap(), 1);

    client.top_level_end(false).await.unwrap();
    assert_eq!(client.xact_level(&sref).await.unwrap(), 0);
}

#[tokio::test]
async fn test_client_handles() {
    let client = client();
    let sref = client
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
        .await
        .unwrap();

    let stmt = client.allocate_handle(&sref, HandleKind::Statement).await.unwrap();
    let lob = client.allocate_descriptor(&sref, HandleKind::LobLocator).await.unwrap();
    assert_eq!(client.stats().await.open_handles, 2);

    client.free_handle(&sref, stmt).await.unwrap();
    assert_eq!(client.stats().await.open_handles, 1);

    assert!(client.end_subtransaction(&sref, 1, true).await.unwrap_err().is_internal());
    client.end_transaction(&sref, true, false).await.unwrap();
    // the transaction end released the descriptor
    assert_eq!(client.stats().await.open_handles, 0);
    assert!(client.free_handle(&sref, lob).await.unwrap_err().is_internal());
}

#[tokio::test]
async fn test_client_close_session() {
    let client = client();
    let sref = client
        .acquire_session(&SessionRequest::new("orcl", "alice", "wonderland"))
        .await
        .unwrap();

    client.close_session(sref, true).await.unwrap();

    let stats = client.stats().await;
    assert_eq!(stats.sessions, 0);
    assert_eq!(stats.servers, 0);
    assert!(client.sessions().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_tasks_share_sessions() {
    let client = client();

    let mut handles = vec![];
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let sref = client
                .acquire_session(&SessionRequest::new("orcl", "scott", "tiger"))
                .await
                .unwrap();
            client.xact_level(&sref).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 0);
    }

    let stats = client.stats().await;
    assert_eq!(stats.sessions, 1);
    let logons = client.with_cache(|cache| cache.driver().count(DriverOp::BeginSession)).await;
    assert_eq!(logons, 1);
}

#[tokio::test]
async fn test_client_shutdown_twice() {
    let client = client();
    client
        .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(2))
        .await
        .unwrap();

    client.shutdown().await;
    client.shutdown().await;

    let rollbacks = client.with_cache(|cache| cache.driver().count(DriverOp::Rollback)).await;
    assert_eq!(rollbacks, 1);
    assert_eq!(client.stats().await.environments, 0);
}

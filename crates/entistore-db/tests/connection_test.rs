//! Integration tests for the connection manager.

use std::time::Duration;

use entistore_core::models::entity::{CreateEntity, EntityFields};
use entistore_core::repository::{EntityRepository, Visibility};
use entistore_db::{ConnectionState, DbConfig, DbError, DbManager};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn in_memory_manager_becomes_ready() {
    let manager = DbManager::new(DbConfig::in_memory()).unwrap();
    manager.connect_with_retry();
    manager.wait_until_ready(READY_TIMEOUT).await.unwrap();

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.is_ready());

    let repo = manager.repository().expect("repository while connected");
    let entity = repo
        .create(CreateEntity::new(EntityFields::named("A")))
        .await
        .unwrap();
    let fetched = repo.get_by_id(entity.id, Visibility::LiveOnly).await.unwrap();
    assert_eq!(fetched, Some(entity));

    manager.disconnect().await;
}

#[tokio::test]
async fn connect_twice_is_a_noop() {
    let manager = DbManager::new(DbConfig::in_memory()).unwrap();
    manager.connect_with_retry();
    manager.wait_until_ready(READY_TIMEOUT).await.unwrap();

    let repo = manager.repository().unwrap();
    let entity = repo
        .create(CreateEntity::new(EntityFields::named("A")))
        .await
        .unwrap();

    // A second supervisor would open a fresh, empty in-memory store.
    manager.connect_with_retry();
    assert!(manager.is_ready());
    let repo = manager.repository().unwrap();
    assert!(
        repo.get_by_id(entity.id, Visibility::LiveOnly)
            .await
            .unwrap()
            .is_some()
    );

    manager.disconnect().await;
}

#[tokio::test]
async fn disconnect_drops_client() {
    let manager = DbManager::new(DbConfig::in_memory()).unwrap();
    manager.connect_with_retry();
    manager.wait_until_ready(READY_TIMEOUT).await.unwrap();

    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.client().is_none());
    assert!(manager.repository().is_none());
}

#[tokio::test]
async fn unreachable_endpoint_gives_up_after_max_attempts() {
    let config = DbConfig {
        endpoint: "bogus://nowhere".into(),
        max_attempts: Some(2),
        retry_delay: Duration::from_millis(10),
        ..DbConfig::in_memory()
    };
    let manager = DbManager::new(config).unwrap();
    let mut states = manager.subscribe();
    manager.connect_with_retry();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

    tokio::time::timeout(
        READY_TIMEOUT,
        states.wait_for(|state| *state == ConnectionState::Disconnected),
    )
    .await
    .expect("supervisor should give up")
    .unwrap();

    assert!(!manager.is_ready());
    assert!(manager.client().is_none());
}

#[tokio::test]
async fn wait_until_ready_times_out_while_disconnected() {
    let manager = DbManager::new(DbConfig::in_memory()).unwrap();
    let err = manager
        .wait_until_ready(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotReady(_)));
}

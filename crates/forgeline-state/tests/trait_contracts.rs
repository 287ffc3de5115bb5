//! Trait contract tests for ServerConfigStore, SecretStore, and RegistryStore.
//!
//! Every contract runs against the in-memory fakes and against an
//! in-memory SurrealDB instance.

use std::sync::Arc;

use forgeline_state::fakes::{MemoryRegistryStore, MemorySecretStore, MemoryServerConfigStore};
use forgeline_state::storage_traits::*;
use forgeline_state::{StorageError, SurrealStore};

// ===========================================================================
// ServerConfigStore contracts
// ===========================================================================

async fn config_get_missing_is_not_found(store: &dyn ServerConfigStore) {
    let err = store.server_config_get("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

async fn config_set_then_get(store: &dyn ServerConfigStore) {
    store.server_config_set("answer", "42").await.unwrap();
    assert_eq!(store.server_config_get("answer").await.unwrap(), "42");

    store.server_config_set("answer", "43").await.unwrap();
    assert_eq!(store.server_config_get("answer").await.unwrap(), "43");
}

async fn config_insert_if_absent_keeps_first(store: &dyn ServerConfigStore) {
    let first = store
        .server_config_insert_if_absent("signature-private-key", "aaaa")
        .await
        .unwrap();
    let second = store
        .server_config_insert_if_absent("signature-private-key", "bbbb")
        .await
        .unwrap();

    assert_eq!(first, "aaaa");
    assert_eq!(second, "aaaa");
    assert_eq!(
        store.server_config_get("signature-private-key").await.unwrap(),
        "aaaa"
    );
}

async fn config_delete(store: &dyn ServerConfigStore) {
    store.server_config_set("gone", "soon").await.unwrap();
    store.server_config_delete("gone").await.unwrap();
    assert!(store.server_config_get("gone").await.is_err());
    // deleting twice is fine
    store.server_config_delete("gone").await.unwrap();
}

async fn run_config_contracts(store: &dyn ServerConfigStore) {
    config_get_missing_is_not_found(store).await;
    config_set_then_get(store).await;
    config_insert_if_absent_keeps_first(store).await;
    config_delete(store).await;
}

#[tokio::test]
async fn memory_server_config_contracts() {
    run_config_contracts(&MemoryServerConfigStore::new()).await;
}

#[tokio::test]
async fn surreal_server_config_contracts() {
    let store = SurrealStore::in_memory().await.unwrap();
    run_config_contracts(&store).await;
}

#[tokio::test]
async fn concurrent_insert_if_absent_agrees_on_one_value() {
    let store: Arc<dyn ServerConfigStore> = Arc::new(SurrealStore::in_memory().await.unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .server_config_insert_if_absent("race", &format!("value-{i}"))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<String> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let stored = store.server_config_get("race").await.unwrap();
    assert!(results.iter().all(|v| *v == stored));
}

// ===========================================================================
// SecretStore contracts
// ===========================================================================

async fn run_secret_contracts(store: &dyn SecretStore) {
    let repo = Scope::Repo("octo/hello".to_string());
    let org = Scope::Org("octo".to_string());

    store
        .secret_create(Secret::new(repo.clone(), "b_token", "2"))
        .await
        .unwrap();
    store
        .secret_create(Secret::new(repo.clone(), "a_token", "1").with_events(["push"]))
        .await
        .unwrap();
    store
        .secret_create(Secret::new(org.clone(), "a_token", "org"))
        .await
        .unwrap();

    // sorted by name, scoped
    let listed = store.secret_list(&repo).await.unwrap();
    let names: Vec<_> = listed.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a_token", "b_token"]);
    assert_eq!(listed[0].events, vec!["push".to_string()]);

    let found = store.secret_find(&org, "a_token").await.unwrap().unwrap();
    assert_eq!(found.value, "org");
    assert!(store.secret_find(&Scope::Global, "a_token").await.unwrap().is_none());

    let dup = store
        .secret_create(Secret::new(repo.clone(), "a_token", "again"))
        .await
        .unwrap_err();
    assert!(matches!(dup, StorageError::AlreadyExists { .. }));

    store.secret_delete(&repo, "a_token").await.unwrap();
    assert!(store.secret_find(&repo, "a_token").await.unwrap().is_none());
    assert_eq!(store.secret_list(&repo).await.unwrap().len(), 1);
}

#[tokio::test]
async fn memory_secret_contracts() {
    run_secret_contracts(&MemorySecretStore::new()).await;
}

#[tokio::test]
async fn surreal_secret_contracts() {
    let store = SurrealStore::in_memory().await.unwrap();
    run_secret_contracts(&store).await;
}

// ===========================================================================
// RegistryStore contracts
// ===========================================================================

async fn run_registry_contracts(store: &dyn RegistryStore) {
    let repo = Scope::Repo("octo/hello".to_string());

    store
        .registry_create(Registry::new(repo.clone(), "ghcr.io", "octo", "pw"))
        .await
        .unwrap();
    store
        .registry_create(Registry::new(Scope::Global, "docker.io", "bot", "pw2"))
        .await
        .unwrap();

    let found = store.registry_find(&repo, "ghcr.io").await.unwrap().unwrap();
    assert_eq!(found.username, "octo");
    assert!(store.registry_find(&repo, "docker.io").await.unwrap().is_none());

    let global = store.registry_list(&Scope::Global).await.unwrap();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].address, "docker.io");

    let dup = store
        .registry_create(Registry::new(repo.clone(), "ghcr.io", "x", "y"))
        .await
        .unwrap_err();
    assert!(matches!(dup, StorageError::AlreadyExists { .. }));

    store.registry_delete(&repo, "ghcr.io").await.unwrap();
    assert!(store.registry_list(&repo).await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_registry_contracts() {
    run_registry_contracts(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn surreal_registry_contracts() {
    let store = SurrealStore::in_memory().await.unwrap();
    run_registry_contracts(&store).await;
}

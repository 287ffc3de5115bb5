//! Config override authority and per-repo service selection.

use std::sync::Arc;

use forgeline_core::fakes::{MockTransport, ScriptedForge};
use forgeline_core::{
    ApiResponse, ConfigError, EventKind, FileBlob, ForgeError, HttpMethod, Pipeline, Repo, User,
};
use forgeline_extensions::{
    verify_signature, CombinedConfigService, ConfigService, ExtensionClient, ExtensionError,
    ExtensionManager, ExtensionSettings, ForgeConfigService, HttpConfigExtension, KeyProvider,
};
use forgeline_state::fakes::{MemoryRegistryStore, MemorySecretStore, MemoryServerConfigStore};
use forgeline_state::{Registry, RegistryStore, Scope, Secret, SecretStore, SurrealStore};
use serde_json::json;

const ENDPOINT: &str = "https://ext.example.com/config";

struct Harness {
    transport: Arc<MockTransport>,
    keys: Arc<KeyProvider>,
}

impl Harness {
    fn new(transport: MockTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            keys: Arc::new(KeyProvider::new(Arc::new(MemoryServerConfigStore::new()))),
        }
    }

    fn combined(&self) -> CombinedConfigService {
        let client = ExtensionClient::new(self.transport.clone(), self.keys.clone());
        CombinedConfigService::new(
            ForgeConfigService::new(),
            HttpConfigExtension::new(client, ENDPOINT),
        )
    }
}

fn repo() -> Repo {
    Repo::new("octo", "hello")
}

fn pipeline() -> Pipeline {
    Pipeline {
        commit: "abc123".to_string(),
        git_ref: "refs/heads/main".to_string(),
        branch: "main".to_string(),
        ..Default::default()
    }
}

async fn resolve(
    service: &dyn ConfigService,
    forge: ScriptedForge,
) -> Result<Vec<FileBlob>, ExtensionError> {
    service
        .fetch(Arc::new(forge), &User::with_token("octo", "t"), &repo(), &pipeline())
        .await
}

fn local_forge() -> ScriptedForge {
    ScriptedForge::new().with_file(".woodpecker.yml", "steps: [a]")
}

// ---------------------------------------------------------------------------
// Config override
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_200_cancels_local_files() {
    let h = Harness::new(MockTransport::new().on_json(
        HttpMethod::Post,
        ENDPOINT,
        &json!({ "configs": [] }),
    ));

    let files = resolve(&h.combined(), local_forge()).await.unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn status_204_keeps_local_files() {
    let h = Harness::new(MockTransport::new().on(
        HttpMethod::Post,
        ENDPOINT,
        ApiResponse::new(204, ""),
    ));

    let files = resolve(&h.combined(), local_forge()).await.unwrap();

    assert_eq!(files, vec![FileBlob::new(".woodpecker.yml", "steps: [a]")]);
}

#[tokio::test]
async fn status_200_replaces_local_files() {
    let h = Harness::new(MockTransport::new().on_json(
        HttpMethod::Post,
        ENDPOINT,
        &json!({ "configs": [{ "name": "generated.yml", "data": "steps: [b]" }] }),
    ));

    let files = resolve(&h.combined(), local_forge()).await.unwrap();

    assert_eq!(files, vec![FileBlob::new("generated.yml", "steps: [b]")]);
}

#[tokio::test]
async fn extension_failure_discards_local_success() {
    let h = Harness::new(MockTransport::new().on(
        HttpMethod::Post,
        ENDPOINT,
        ApiResponse::new(500, "extension down"),
    ));

    let err = resolve(&h.combined(), local_forge()).await.unwrap_err();

    match err {
        ExtensionError::Override { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "extension down");
        }
        other => panic!("expected override error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_extension_fails_resolution() {
    let h = Harness::new(MockTransport::new().on_error(
        HttpMethod::Post,
        ENDPOINT,
        ForgeError::Transport("connection refused".to_string()),
    ));

    let err = resolve(&h.combined(), local_forge()).await.unwrap_err();

    assert!(matches!(err, ExtensionError::Transport(_)));
}

#[tokio::test]
async fn extension_rescues_missing_local_config() {
    let h = Harness::new(MockTransport::new().on_json(
        HttpMethod::Post,
        ENDPOINT,
        &json!({ "configs": [{ "name": "remote.yml", "data": "steps: []" }] }),
    ));

    let files = resolve(&h.combined(), ScriptedForge::new()).await.unwrap();

    assert_eq!(files, vec![FileBlob::new("remote.yml", "steps: []")]);
    let sent: serde_json::Value =
        serde_json::from_slice(h.transport.requests()[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(sent["configs"], json!([]));
}

#[tokio::test]
async fn status_204_keeps_local_error() {
    let h = Harness::new(MockTransport::new().on(
        HttpMethod::Post,
        ENDPOINT,
        ApiResponse::new(204, ""),
    ));

    let err = resolve(&h.combined(), ScriptedForge::new()).await.unwrap_err();

    assert!(matches!(
        err,
        ExtensionError::Config(ConfigError::FallbackNotFound { .. })
    ));
}

#[tokio::test]
async fn local_deadline_skips_extension() {
    let h = Harness::new(MockTransport::new().on(
        HttpMethod::Post,
        ENDPOINT,
        ApiResponse::new(204, ""),
    ));
    let forge = ScriptedForge::new().failing_with(ForgeError::DeadlineExceeded("tree".into()));

    let err = resolve(&h.combined(), forge).await.unwrap_err();

    assert!(err.is_deadline_exceeded());
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn override_request_is_signed_and_carries_context() {
    let h = Harness::new(MockTransport::new().on(
        HttpMethod::Post,
        ENDPOINT,
        ApiResponse::new(204, ""),
    ));

    resolve(&h.combined(), local_forge()).await.unwrap();

    let requests = h.transport.requests_to(HttpMethod::Post, ENDPOINT);
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.header("content-type"), Some("application/json"));

    let key = h.keys.verifying_key().await.unwrap();
    verify_signature(&key, req).unwrap();

    let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["repo"]["full_name"], "octo/hello");
    assert_eq!(body["pipeline"]["ref"], "refs/heads/main");
    assert_eq!(
        body["configs"],
        json!([{ "name": ".woodpecker.yml", "data": "steps: [a]" }])
    );
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct Stores {
    secrets: Arc<MemorySecretStore>,
    registries: Arc<MemoryRegistryStore>,
}

fn manager(settings: ExtensionSettings, transport: Arc<MockTransport>) -> (ExtensionManager, Stores) {
    let stores = Stores {
        secrets: Arc::new(MemorySecretStore::new()),
        registries: Arc::new(MemoryRegistryStore::new()),
    };
    let keys = Arc::new(KeyProvider::new(Arc::new(MemoryServerConfigStore::new())));
    let manager = ExtensionManager::new(
        settings,
        transport,
        keys,
        stores.secrets.clone(),
        stores.registries.clone(),
    );
    (manager, stores)
}

#[tokio::test]
async fn no_endpoint_means_local_only() {
    let transport = Arc::new(MockTransport::new());
    let (manager, _) = manager(ExtensionSettings::default(), transport.clone());

    let service = manager.config_service_for(&repo());
    let files = resolve(service.as_ref(), local_forge()).await.unwrap();

    assert_eq!(files.len(), 1);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn repo_endpoint_wins_over_global() {
    let repo_endpoint = "https://repo-ext.example.com/config";
    let transport = Arc::new(
        MockTransport::new()
            .on(HttpMethod::Post, repo_endpoint, ApiResponse::new(204, ""))
            .on(HttpMethod::Post, ENDPOINT, ApiResponse::new(500, "")),
    );
    let settings = ExtensionSettings::default().with_config_endpoint(ENDPOINT);
    let (manager, _) = manager(settings, transport.clone());

    let service = manager.config_service_for(&repo().with_config_endpoint(repo_endpoint));
    let files = service
        .fetch(
            Arc::new(local_forge()),
            &User::with_token("octo", "t"),
            &repo(),
            &pipeline(),
        )
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(transport.requests_to(HttpMethod::Post, repo_endpoint).len(), 1);
    assert!(transport.requests_to(HttpMethod::Post, ENDPOINT).is_empty());
}

#[tokio::test]
async fn global_endpoint_applies_without_repo_endpoint() {
    let transport = Arc::new(MockTransport::new().on_json(
        HttpMethod::Post,
        ENDPOINT,
        &json!({ "configs": [] }),
    ));
    let settings = ExtensionSettings::default().with_config_endpoint(ENDPOINT);
    let (manager, _) = manager(settings, transport.clone());

    let service = manager.config_service_for(&repo());
    let files = resolve(service.as_ref(), local_forge()).await.unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn builtin_secrets_follow_scope_precedence_and_events() {
    let (manager, stores) = manager(ExtensionSettings::default(), Arc::new(MockTransport::new()));
    let secrets = &stores.secrets;
    secrets
        .secret_create(Secret::new(Scope::Global, "token", "global"))
        .await
        .unwrap();
    secrets
        .secret_create(Secret::new(Scope::Org("octo".into()), "token", "org"))
        .await
        .unwrap();
    secrets
        .secret_create(Secret::new(Scope::Repo("octo/hello".into()), "token", "repo"))
        .await
        .unwrap();
    secrets
        .secret_create(Secret::new(Scope::Org("octo".into()), "npm", "org-npm"))
        .await
        .unwrap();
    secrets
        .secret_create(Secret::new(Scope::Global, "deploy_key", "k").with_events(["deploy"]))
        .await
        .unwrap();

    let service = manager.secret_service_for(&repo());
    let listed = service.secret_list_pipeline(&repo(), &pipeline()).await.unwrap();

    let pairs: Vec<_> = listed
        .iter()
        .map(|s| (s.name.as_str(), s.value.as_str()))
        .collect();
    assert_eq!(pairs, vec![("npm", "org-npm"), ("token", "repo")]);

    let deploy = Pipeline {
        event: EventKind::Deploy,
        ..pipeline()
    };
    let listed = service.secret_list_pipeline(&repo(), &deploy).await.unwrap();
    assert_eq!(listed.len(), 3);

    let found = service.secret_find(&repo(), "npm").await.unwrap().unwrap();
    assert_eq!(found.scope, Scope::Org("octo".into()));
    assert!(service.secret_find(&repo(), "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn http_secrets_replace_builtin_without_fallback() {
    let endpoint = "https://secrets.example.com/";
    let transport = Arc::new(MockTransport::new().on(
        HttpMethod::Post,
        endpoint,
        ApiResponse::new(204, ""),
    ));
    let (manager, stores) = manager(ExtensionSettings::default(), transport.clone());
    stores
        .secrets
        .secret_create(Secret::new(Scope::Global, "token", "global"))
        .await
        .unwrap();

    let repo = repo().with_secret_endpoint(endpoint);
    let service = manager.secret_service_for(&repo);

    assert!(service.secret_list_pipeline(&repo, &pipeline()).await.unwrap().is_empty());
    assert_eq!(transport.requests_to(HttpMethod::Post, endpoint).len(), 1);
}

#[tokio::test]
async fn http_secrets_are_scoped_to_the_repo() {
    let endpoint = "https://secrets.example.com/";
    let transport = Arc::new(MockTransport::new().on_json(
        HttpMethod::Post,
        endpoint,
        &json!({ "secrets": [
            { "name": "token", "value": "remote", "events": ["push"] },
            { "name": "other", "value": "x" }
        ] }),
    ));
    let (manager, _) = manager(ExtensionSettings::default(), transport);

    let repo = repo().with_secret_endpoint(endpoint);
    let service = manager.secret_service_for(&repo);

    let found = service.secret_find(&repo, "token").await.unwrap().unwrap();
    assert_eq!(found.value, "remote");
    assert_eq!(found.events, vec!["push".to_string()]);
    assert_eq!(found.scope, Scope::Repo("octo/hello".into()));
}

#[tokio::test]
async fn builtin_registries_prefer_repo_entries() {
    let (manager, stores) = manager(ExtensionSettings::default(), Arc::new(MockTransport::new()));
    let registries = &stores.registries;
    registries
        .registry_create(Registry::new(Scope::Global, "docker.io", "bot", "global"))
        .await
        .unwrap();
    registries
        .registry_create(Registry::new(Scope::Global, "ghcr.io", "bot", "ghcr"))
        .await
        .unwrap();
    registries
        .registry_create(Registry::new(
            Scope::Repo("octo/hello".into()),
            "docker.io",
            "octo",
            "repo",
        ))
        .await
        .unwrap();

    let service = manager.registry_service_for(&repo());
    let listed = service.registry_list(&repo()).await.unwrap();

    let pairs: Vec<_> = listed
        .iter()
        .map(|r| (r.address.as_str(), r.password.as_str()))
        .collect();
    assert_eq!(pairs, vec![("docker.io", "repo"), ("ghcr.io", "ghcr")]);

    let found = service.registry_find(&repo(), "ghcr.io").await.unwrap().unwrap();
    assert_eq!(found.scope, Scope::Global);
}

#[tokio::test]
async fn http_registries_come_from_extension() {
    let endpoint = "https://registries.example.com/";
    let transport = Arc::new(MockTransport::new().on_json(
        HttpMethod::Post,
        endpoint,
        &json!({ "registries": [{ "address": "quay.io", "username": "u", "password": "p" }] }),
    ));
    let (manager, _) = manager(ExtensionSettings::default(), transport);

    let repo = repo().with_registry_endpoint(endpoint);
    let service = manager.registry_service_for(&repo);

    let listed = service.registry_list(&repo).await.unwrap();
    assert_eq!(
        listed,
        vec![Registry::new(Scope::Repo("octo/hello".into()), "quay.io", "u", "p")]
    );
    assert!(service.registry_find(&repo, "docker.io").await.unwrap().is_none());
}

#[tokio::test]
async fn surreal_backed_manager_persists_signing_key() {
    let store = Arc::new(SurrealStore::in_memory().await.unwrap());
    let manager = ExtensionManager::from_store(
        ExtensionSettings::default(),
        Arc::new(MockTransport::new()),
        store.clone(),
    );

    let pem = manager.keys().public_key_pem().await.unwrap();
    let again = KeyProvider::new(store).public_key_pem().await.unwrap();

    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    assert_eq!(pem, again);
}

//! Picks the service each repo uses for config, secrets and registries.
//!
//! Every category follows the same rule: a repo-declared endpoint selects the
//! signed HTTP implementation, otherwise the built-in one is used. Config
//! additionally honours a server-wide endpoint when the repo declares none.

use std::sync::Arc;
use std::time::Duration;

use forgeline_core::config::{DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT};
use forgeline_core::{ApiTransport, Repo};
use forgeline_state::{RegistryStore, SecretStore, ServerConfigStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{ExtensionClient, DEFAULT_EXTENSION_TIMEOUT};
use crate::config::{
    CombinedConfigService, ConfigService, ForgeConfigService, HttpConfigExtension,
};
use crate::registries::{BuiltinRegistryService, HttpRegistryService, RegistryService};
use crate::secrets::{BuiltinSecretService, HttpSecretService, SecretService};
use crate::signing::KeyProvider;

/// Server-wide extension settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSettings {
    /// Config extension used by repos without their own endpoint
    pub config_endpoint: Option<String>,
    /// Per-attempt timeout of local config discovery
    pub config_timeout: Duration,
    pub config_attempts: u32,
    /// Timeout of each extension call
    pub extension_timeout: Duration,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        ExtensionSettings {
            config_endpoint: None,
            config_timeout: DEFAULT_TIMEOUT,
            config_attempts: DEFAULT_ATTEMPTS,
            extension_timeout: DEFAULT_EXTENSION_TIMEOUT,
        }
    }
}

impl ExtensionSettings {
    /// Read `FORGELINE_CONFIG_EXTENSION_ENDPOINT`, `FORGELINE_CONFIG_TIMEOUT`
    /// and `FORGELINE_EXTENSION_TIMEOUT` (seconds), falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        ExtensionSettings {
            config_endpoint: std::env::var("FORGELINE_CONFIG_EXTENSION_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            config_timeout: secs("FORGELINE_CONFIG_TIMEOUT", defaults.config_timeout),
            config_attempts: defaults.config_attempts,
            extension_timeout: secs("FORGELINE_EXTENSION_TIMEOUT", defaults.extension_timeout),
        }
    }

    pub fn with_config_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config_endpoint = Some(endpoint.into());
        self
    }
}

/// Prefer an HTTP override when an endpoint is configured, else the built-in.
pub fn resolve_override<S, H, B>(endpoint: Option<&str>, build_http: H, builtin: B) -> Arc<S>
where
    S: ?Sized,
    H: FnOnce(&str) -> Arc<S>,
    B: FnOnce() -> Arc<S>,
{
    match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            debug!(endpoint, "using extension endpoint");
            build_http(endpoint)
        }
        None => builtin(),
    }
}

/// Hands out per-repo config, secret and registry services.
pub struct ExtensionManager {
    settings: ExtensionSettings,
    keys: Arc<KeyProvider>,
    client: ExtensionClient,
    local_config: ForgeConfigService,
    builtin_secrets: Arc<dyn SecretService>,
    builtin_registries: Arc<dyn RegistryService>,
}

impl ExtensionManager {
    pub fn new(
        settings: ExtensionSettings,
        transport: Arc<dyn ApiTransport>,
        keys: Arc<KeyProvider>,
        secrets: Arc<dyn SecretStore>,
        registries: Arc<dyn RegistryStore>,
    ) -> Self {
        let client = ExtensionClient::new(transport, keys.clone())
            .with_timeout(settings.extension_timeout);
        let local_config = ForgeConfigService::new()
            .with_timeout(settings.config_timeout)
            .with_attempts(settings.config_attempts);

        Self {
            settings,
            keys,
            client,
            local_config,
            builtin_secrets: Arc::new(BuiltinSecretService::new(secrets)),
            builtin_registries: Arc::new(BuiltinRegistryService::new(registries)),
        }
    }

    /// Build every service on top of one store that holds all server state.
    pub fn from_store<S>(
        settings: ExtensionSettings,
        transport: Arc<dyn ApiTransport>,
        store: Arc<S>,
    ) -> Self
    where
        S: ServerConfigStore + SecretStore + RegistryStore + 'static,
    {
        let keys = Arc::new(KeyProvider::new(store.clone()));
        Self::new(settings, transport, keys, store.clone(), store)
    }

    pub fn settings(&self) -> &ExtensionSettings {
        &self.settings
    }

    pub fn keys(&self) -> &Arc<KeyProvider> {
        &self.keys
    }

    /// Repo endpoint, then the server endpoint, then local discovery only.
    pub fn config_service_for(&self, repo: &Repo) -> Arc<dyn ConfigService> {
        let endpoint = repo
            .config_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .or(self.settings.config_endpoint.as_deref());

        resolve_override(
            endpoint,
            |endpoint| -> Arc<dyn ConfigService> {
                Arc::new(CombinedConfigService::new(
                    self.local_config.clone(),
                    HttpConfigExtension::new(self.client.clone(), endpoint),
                ))
            },
            || -> Arc<dyn ConfigService> { Arc::new(self.local_config.clone()) },
        )
    }

    pub fn secret_service_for(&self, repo: &Repo) -> Arc<dyn SecretService> {
        resolve_override(
            repo.secret_endpoint.as_deref(),
            |endpoint| -> Arc<dyn SecretService> {
                Arc::new(HttpSecretService::new(self.client.clone(), endpoint))
            },
            || self.builtin_secrets.clone(),
        )
    }

    pub fn registry_service_for(&self, repo: &Repo) -> Arc<dyn RegistryService> {
        resolve_override(
            repo.registry_endpoint.as_deref(),
            |endpoint| -> Arc<dyn RegistryService> {
                Arc::new(HttpRegistryService::new(self.client.clone(), endpoint))
            },
            || self.builtin_registries.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_endpoint_means_builtin() {
        let pick = |endpoint: Option<&str>| {
            *resolve_override(endpoint, |_| Arc::new("http"), || Arc::new("builtin"))
        };
        assert_eq!(pick(Some("https://ext.example.com")), "http");
        assert_eq!(pick(Some("   ")), "builtin");
        assert_eq!(pick(None), "builtin");
    }

    #[test]
    fn default_settings_have_no_global_endpoint() {
        let settings = ExtensionSettings::default();
        assert_eq!(settings.config_endpoint, None);
        assert_eq!(settings.config_attempts, 3);
        assert_eq!(settings.config_timeout, Duration::from_secs(3));
    }
}

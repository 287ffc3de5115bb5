//! Forgeline - forge integration CLI
//!
//! The `forgeline` command exercises the integration layer outside a server.
//!
//! ## Commands
//!
//! - `parse-hook`: normalize a recorded webhook into a pipeline trigger
//! - `resolve-config`: resolve the config files of a commit against a forge
//! - `secrets`: list the secrets a pipeline would receive
//! - `keys`: show the extension signing key

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use forgeline_core::transport::DEFAULT_HTTP_TIMEOUT;
use forgeline_core::{
    init_tracing, ApiTransport, EventKind, FileBlob, FixedOwner, Forge, ForgeKind, HookOutcome,
    HookRequest, Pipeline, Repo, RepoLookup, ReqwestTransport, User,
};
use forgeline_extensions::{ExtensionManager, ExtensionSettings};
use forgeline_forges::{build_forge, ForgeOptions};
use forgeline_state::SurrealStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "forgeline")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Forge integration layer for CI servers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Database URL holding server state (mem://, surrealkv://path, ws://host)
    #[arg(long, global = true, env = "FORGELINE_DB", default_value = "mem://")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

/// Which forge to talk to.
#[derive(Args, Debug, Clone)]
struct ForgeArgs {
    /// Forge type: github, gitlab, gitea, forgejo, bitbucket
    #[arg(long, env = "FORGELINE_FORGE")]
    forge: ForgeKind,

    /// Forge web URL (defaults to the provider's public instance)
    #[arg(long, env = "FORGELINE_FORGE_URL")]
    forge_url: Option<String>,

    /// Build pull requests from the merge ref (GitHub)
    #[arg(long)]
    merge_ref: bool,
}

impl ForgeArgs {
    fn options(&self) -> ForgeOptions {
        let mut options = ForgeOptions::from_env().with_merge_ref(self.merge_ref);
        if let Some(url) = &self.forge_url {
            options.url = url.clone();
        }
        options
    }

    fn build(&self) -> Result<Arc<dyn Forge>> {
        let options = self.options();
        let transport: Arc<dyn ApiTransport> = Arc::new(
            ReqwestTransport::build(options.skip_verify, DEFAULT_HTTP_TIMEOUT)
                .context("Failed to build HTTP client")?,
        );
        build_forge(self.forge, options, transport).context("Failed to configure forge")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a recorded webhook and print the outcome as JSON
    ParseHook {
        #[command(flatten)]
        forge: ForgeArgs,

        /// Request header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_header_arg)]
        headers: Vec<(String, String)>,

        /// File holding the raw request body
        #[arg(short, long)]
        body: PathBuf,

        /// Token used to backfill pull request files from the forge
        #[arg(long, env = "FORGELINE_FORGE_TOKEN")]
        token: Option<String>,
    },

    /// Resolve the pipeline config for a commit
    ResolveConfig {
        #[command(flatten)]
        forge: ForgeArgs,

        /// Repository as `owner/name`
        #[arg(short, long)]
        repo: String,

        /// Commit SHA to read config from
        #[arg(short, long)]
        commit: String,

        /// Branch (defaults to the repository's default branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Declared config path; empty uses the conventional locations
        #[arg(long, default_value = "")]
        config_path: String,

        /// Server-wide config extension
        #[arg(long, env = "FORGELINE_CONFIG_EXTENSION_ENDPOINT")]
        config_extension_endpoint: Option<String>,

        /// Per-attempt timeout in seconds
        #[arg(long, default_value = "3")]
        timeout: u64,

        /// Forge access token
        #[arg(long, env = "FORGELINE_FORGE_TOKEN")]
        token: String,

        /// Forge login of the token owner
        #[arg(long, default_value = "forgeline")]
        login: String,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Built-in secrets
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },

    /// Extension signing key
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum SecretsAction {
    /// List the secret names a pipeline would receive
    List {
        /// Repository as `owner/name`
        #[arg(short, long)]
        repo: String,

        /// Pipeline event
        #[arg(short, long, default_value = "push")]
        event: String,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Print the public key extensions verify signatures with (needs a persistent --db)
    PublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Parse a `Name: value` header argument.
fn parse_header_arg(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::ParseHook {
            forge,
            headers,
            body,
            token,
        } => cmd_parse_hook(&forge, &headers, &body, token.as_deref()).await,
        Commands::ResolveConfig {
            forge,
            repo,
            commit,
            branch,
            config_path,
            config_extension_endpoint,
            timeout,
            token,
            login,
            format,
        } => {
            let store = open_store(&cli.db).await?;
            let forge_impl = forge.build()?;
            let mut settings = ExtensionSettings::from_env();
            settings.config_timeout = Duration::from_secs(timeout);
            if let Some(endpoint) = config_extension_endpoint {
                settings = settings.with_config_endpoint(endpoint);
            }
            let manager = ExtensionManager::from_store(settings, extension_transport()?, store);

            let user = User::with_token(login, token);
            let request = ResolveRequest {
                repo: &repo,
                commit: &commit,
                branch: branch.as_deref(),
                config_path: &config_path,
            };
            let files = cmd_resolve_config(&manager, forge_impl, &user, request).await?;
            print_files(&files, format)
        }
        Commands::Secrets { action } => match action {
            SecretsAction::List { repo, event } => {
                let store = open_store(&cli.db).await?;
                let manager = ExtensionManager::from_store(
                    ExtensionSettings::from_env(),
                    extension_transport()?,
                    store,
                );
                for name in cmd_secrets_list(&manager, &repo, &event).await? {
                    println!("{name}");
                }
                Ok(())
            }
        },
        Commands::Keys { action } => match action {
            KeysAction::PublicKey => {
                ensure_persistent_db(&cli.db)?;
                let store = open_store(&cli.db).await?;
                let manager = ExtensionManager::from_store(
                    ExtensionSettings::from_env(),
                    extension_transport()?,
                    store,
                );
                print!("{}", cmd_public_key(&manager).await?);
                Ok(())
            }
        },
    }
}

async fn open_store(url: &str) -> Result<Arc<SurrealStore>> {
    let store = SurrealStore::connect(url)
        .await
        .with_context(|| format!("Failed to open Forgeline database at {url}"))?;
    Ok(Arc::new(store))
}

/// Reject in-memory databases, whose signing key is lost on exit.
fn ensure_persistent_db(url: &str) -> Result<()> {
    let url = url.trim();
    if url.starts_with("mem:") || url == "memory" {
        anyhow::bail!(
            "{url} is in-memory; the printed key would be discarded on exit. \
             Pass --db (or FORGELINE_DB) pointing at the server's database"
        );
    }
    Ok(())
}

fn extension_transport() -> Result<Arc<dyn ApiTransport>> {
    Ok(Arc::new(
        ReqwestTransport::new().context("Failed to build HTTP client")?,
    ))
}

/// Read a recorded webhook from disk.
fn load_hook_request(headers: &[(String, String)], body: &Path) -> Result<HookRequest> {
    let raw = std::fs::read(body)
        .with_context(|| format!("Failed to read hook body from {}", body.display()))?;
    Ok(headers
        .iter()
        .fold(HookRequest::new(raw), |req, (name, value)| {
            req.with_header(name, value.clone())
        }))
}

/// Normalize a hook; with a token, pull request files are backfilled.
async fn normalize_hook(
    forge: &dyn Forge,
    req: &HookRequest,
    token: Option<&str>,
) -> Result<HookOutcome> {
    let outcome = match token {
        Some(token) => {
            let owner = FixedOwner(Some(User::with_token("forgeline", token)));
            forge.hook(req, &owner).await
        }
        None => forge.parse_hook(req),
    };
    outcome.context("Failed to normalize webhook")
}

async fn cmd_parse_hook(
    forge: &ForgeArgs,
    headers: &[(String, String)],
    body: &Path,
    token: Option<&str>,
) -> Result<()> {
    let req = load_hook_request(headers, body)?;
    let forge = forge.build()?;
    let outcome = normalize_hook(forge.as_ref(), &req, token).await?;

    match &outcome {
        HookOutcome::Matched { repo, pipeline } => {
            info!(repo = %repo.full_name, event = %pipeline.event, "hook matched")
        }
        HookOutcome::Ignored(ignored) => info!("{}", ignored),
        HookOutcome::Suppressed => info!("ref deletion, nothing to build"),
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

struct ResolveRequest<'a> {
    repo: &'a str,
    commit: &'a str,
    branch: Option<&'a str>,
    config_path: &'a str,
}

async fn cmd_resolve_config(
    manager: &ExtensionManager,
    forge: Arc<dyn Forge>,
    user: &User,
    request: ResolveRequest<'_>,
) -> Result<Vec<FileBlob>> {
    let (owner, name) = request
        .repo
        .split_once('/')
        .context("Repository must be given as owner/name")?;

    let repo = forge
        .repo(
            user,
            &RepoLookup::Name {
                owner: owner.to_string(),
                name: name.to_string(),
            },
        )
        .await
        .with_context(|| format!("Failed to look up {}", request.repo))?
        .with_config_path(request.config_path);

    let branch = request
        .branch
        .map(str::to_string)
        .unwrap_or_else(|| repo.default_branch.clone());
    let pipeline = Pipeline {
        event: EventKind::Push,
        commit: request.commit.to_string(),
        git_ref: format!("refs/heads/{branch}"),
        branch,
        ..Default::default()
    };

    let files = manager
        .config_service_for(&repo)
        .fetch(forge, user, &repo, &pipeline)
        .await
        .with_context(|| format!("Failed to resolve config for {}", repo.full_name))?;

    info!(repo = %repo.full_name, files = files.len(), "config resolved");
    Ok(files)
}

#[derive(Serialize)]
struct ResolvedFile {
    name: String,
    data: String,
}

fn print_files(files: &[FileBlob], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let out: Vec<ResolvedFile> = files
                .iter()
                .map(|f| ResolvedFile {
                    name: f.name.clone(),
                    data: f.text(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if files.is_empty() {
                println!("No config files; the pipeline would not run.");
            }
            for file in files {
                println!("--- {} ---", file.name);
                println!("{}", file.text());
            }
        }
    }
    Ok(())
}

async fn cmd_secrets_list(
    manager: &ExtensionManager,
    repo: &str,
    event: &str,
) -> Result<Vec<String>> {
    let (owner, name) = repo
        .split_once('/')
        .context("Repository must be given as owner/name")?;
    let repo = Repo::new(owner, name);
    let event: EventKind = serde_json::from_value(serde_json::Value::String(event.to_string()))
        .with_context(|| format!("Unknown event: {event}"))?;
    let pipeline = Pipeline {
        event,
        ..Default::default()
    };

    let secrets = manager
        .secret_service_for(&repo)
        .secret_list_pipeline(&repo, &pipeline)
        .await
        .context("Failed to list secrets")?;
    Ok(secrets.into_iter().map(|s| s.name).collect())
}

async fn cmd_public_key(manager: &ExtensionManager) -> Result<String> {
    manager
        .keys()
        .public_key_pem()
        .await
        .context("Failed to load signing key")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeline_core::fakes::{MockTransport, ScriptedForge};
    use forgeline_state::{Scope, Secret, SecretStore};
    use serde_json::json;

    fn github_args() -> ForgeArgs {
        ForgeArgs {
            forge: ForgeKind::Github,
            forge_url: None,
            merge_ref: false,
        }
    }

    async fn memory_manager() -> (ExtensionManager, Arc<SurrealStore>) {
        let store = Arc::new(SurrealStore::in_memory().await.unwrap());
        let manager = ExtensionManager::from_store(
            ExtensionSettings::default(),
            Arc::new(MockTransport::new()),
            store.clone(),
        );
        (manager, store)
    }

    #[test]
    fn header_args_split_on_first_colon() {
        assert_eq!(
            parse_header_arg("X-GitHub-Event: push").unwrap(),
            ("X-GitHub-Event".to_string(), "push".to_string())
        );
        assert_eq!(
            parse_header_arg("Link: <a:b>").unwrap(),
            ("Link".to_string(), "<a:b>".to_string())
        );
        assert!(parse_header_arg("no-colon").is_err());
        assert!(parse_header_arg(": value").is_err());
    }

    #[test]
    fn cli_parses_parse_hook() {
        let cli = Cli::try_parse_from([
            "forgeline",
            "parse-hook",
            "--forge",
            "gitlab",
            "-H",
            "X-Gitlab-Event: Push Hook",
            "--body",
            "hook.json",
        ])
        .unwrap();

        match cli.command {
            Commands::ParseHook { forge, headers, .. } => {
                assert_eq!(forge.forge, ForgeKind::Gitlab);
                assert_eq!(headers[0].1, "Push Hook");
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_forge() {
        assert!(Cli::try_parse_from([
            "forgeline",
            "parse-hook",
            "--forge",
            "sourcehut",
            "--body",
            "hook.json"
        ])
        .is_err());
    }

    #[tokio::test]
    async fn recorded_github_push_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("push.json");
        let payload = json!({
            "ref": "refs/heads/main",
            "after": "2222222222222222222222222222222222222222",
            "head_commit": {
                "id": "2222222222222222222222222222222222222222",
                "message": "fix parser",
                "timestamp": "2024-01-01T00:00:00Z",
                "author": {"name": "Octo", "email": "octo@example.com", "username": "octo"}
            },
            "commits": [],
            "sender": {"login": "octo"},
            "repository": {
                "id": 1,
                "name": "hello",
                "full_name": "octo/hello",
                "owner": {"login": "octo"},
                "default_branch": "main"
            }
        });
        std::fs::write(&body, serde_json::to_vec(&payload).unwrap()).unwrap();

        let headers = vec![("X-GitHub-Event".to_string(), "push".to_string())];
        let req = load_hook_request(&headers, &body).unwrap();
        let forge = github_args().build().unwrap();
        let outcome = normalize_hook(forge.as_ref(), &req, None).await.unwrap();

        let (repo, pipeline) = outcome.into_matched().unwrap();
        assert_eq!(repo.full_name, "octo/hello");
        assert_eq!(pipeline.branch, "main");
        assert_eq!(pipeline.commit, "2222222222222222222222222222222222222222");
    }

    #[test]
    fn missing_body_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_hook_request(&[], &dir.path().join("absent.json")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read hook body"));
    }

    #[tokio::test]
    async fn resolve_config_uses_repository_files() {
        let (manager, _) = memory_manager().await;
        let forge = Arc::new(ScriptedForge::new().with_file("ci/build.yml", "steps: []"));

        let files = cmd_resolve_config(
            &manager,
            forge,
            &User::with_token("octo", "t"),
            ResolveRequest {
                repo: "octo/hello",
                commit: "abc",
                branch: Some("main"),
                config_path: "ci/",
            },
        )
        .await
        .unwrap();

        assert_eq!(files, vec![FileBlob::new("ci/build.yml", "steps: []")]);
    }

    #[tokio::test]
    async fn resolve_config_requires_owner_and_name() {
        let (manager, _) = memory_manager().await;
        let err = cmd_resolve_config(
            &manager,
            Arc::new(ScriptedForge::new()),
            &User::default(),
            ResolveRequest {
                repo: "hello",
                commit: "abc",
                branch: None,
                config_path: "",
            },
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("owner/name"));
    }

    #[tokio::test]
    async fn secrets_list_filters_by_event() {
        let (manager, store) = memory_manager().await;
        store
            .secret_create(Secret::new(Scope::Global, "docker_token", "x"))
            .await
            .unwrap();
        store
            .secret_create(
                Secret::new(Scope::Repo("octo/hello".into()), "deploy", "y").with_events(["deploy"]),
            )
            .await
            .unwrap();

        let names = cmd_secrets_list(&manager, "octo/hello", "push").await.unwrap();
        assert_eq!(names, vec!["docker_token".to_string()]);

        let names = cmd_secrets_list(&manager, "octo/hello", "deploy").await.unwrap();
        assert_eq!(names, vec!["deploy".to_string(), "docker_token".to_string()]);

        assert!(cmd_secrets_list(&manager, "octo/hello", "nightly").await.is_err());
    }

    #[test]
    fn public_key_needs_a_persistent_database() {
        assert!(ensure_persistent_db("mem://").is_err());
        assert!(ensure_persistent_db(" memory ").is_err());
        assert!(ensure_persistent_db("surrealkv:///var/lib/forgeline/db").is_ok());
        assert!(ensure_persistent_db("ws://db.internal:8000").is_ok());
    }

    #[tokio::test]
    async fn public_key_is_stable_per_database() {
        let (manager, _) = memory_manager().await;

        let first = cmd_public_key(&manager).await.unwrap();
        let second = cmd_public_key(&manager).await.unwrap();

        assert!(first.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(first, second);
    }
}

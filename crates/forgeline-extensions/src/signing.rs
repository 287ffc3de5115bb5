//! Request signing for extension calls
//!
//! The server owns one ed25519 keypair, created on first use and persisted
//! under [`PRIVATE_KEY_CONFIG_KEY`]. Every extension request carries
//! RFC 9421 style headers:
//!
//! ```text
//! Content-Digest: sha-512=:<base64>:
//! Signature-Input: sig1=("@method" "@target-uri" "content-digest");created=<unix>;keyid="forgeline-extensions";alg="ed25519"
//! Signature: sig1=:<base64>:
//! ```
//!
//! Extensions verify them with the public key from [`KeyProvider::public_key_pem`].

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use forgeline_core::{ApiRequest, HttpMethod};
use forgeline_state::ServerConfigStore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::error::ExtensionError;
use crate::Result;

/// Server-config key holding the hex-encoded keypair.
pub const PRIVATE_KEY_CONFIG_KEY: &str = "signature-private-key";

/// `keyid` parameter of every signature.
pub const KEY_ID: &str = "forgeline-extensions";

pub const CONTENT_DIGEST_HEADER: &str = "Content-Digest";
pub const SIGNATURE_INPUT_HEADER: &str = "Signature-Input";
pub const SIGNATURE_HEADER: &str = "Signature";

const SIGNATURE_LABEL: &str = "sig1";
const COVERED_COMPONENTS: &str = r#"("@method" "@target-uri" "content-digest")"#;

/// DER prefix of an ed25519 SubjectPublicKeyInfo; the 32 key bytes follow.
const SPKI_ED25519_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

// ---------------------------------------------------------------------------
// KeyProvider
// ---------------------------------------------------------------------------

/// Loads or provisions the server signing key.
///
/// The key is resolved at most once per provider. Concurrent first callers
/// share the same initialization, and concurrent providers on one store
/// converge on whichever key `server_config_insert_if_absent` kept.
pub struct KeyProvider {
    store: Arc<dyn ServerConfigStore>,
    key: OnceCell<SigningKey>,
}

impl KeyProvider {
    pub fn new(store: Arc<dyn ServerConfigStore>) -> Self {
        Self {
            store,
            key: OnceCell::new(),
        }
    }

    /// The signing key, loading or creating it on first call.
    pub async fn signing_key(&self) -> Result<&SigningKey> {
        self.key.get_or_try_init(|| self.load_or_create()).await
    }

    /// A signer bound to the server key.
    pub async fn signer(&self) -> Result<RequestSigner> {
        Ok(RequestSigner::new(self.signing_key().await?.clone()))
    }

    pub async fn verifying_key(&self) -> Result<VerifyingKey> {
        Ok(self.signing_key().await?.verifying_key())
    }

    /// Public key as a PEM-encoded SubjectPublicKeyInfo.
    pub async fn public_key_pem(&self) -> Result<String> {
        Ok(public_key_to_pem(&self.verifying_key().await?))
    }

    #[instrument(skip(self))]
    async fn load_or_create(&self) -> Result<SigningKey> {
        match self.store.server_config_get(PRIVATE_KEY_CONFIG_KEY).await {
            Ok(encoded) => {
                debug!("loaded persisted signing key");
                decode_private_key(&encoded)
            }
            Err(err) if err.is_not_found() => {
                let generated = SigningKey::generate(&mut OsRng);
                let encoded = hex::encode(generated.to_keypair_bytes());
                let stored = self
                    .store
                    .server_config_insert_if_absent(PRIVATE_KEY_CONFIG_KEY, &encoded)
                    .await?;

                if stored == encoded {
                    info!("generated new signing key");
                } else {
                    info!("another process stored the signing key first, adopting it");
                }
                decode_private_key(&stored)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Decode a persisted key: hex of the 64-byte keypair or of a 32-byte seed.
pub fn decode_private_key(encoded: &str) -> Result<SigningKey> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|e| ExtensionError::InvalidKey(format!("not hex: {e}")))?;

    match bytes.len() {
        64 => {
            let mut keypair = [0u8; 64];
            keypair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&keypair)
                .map_err(|e| ExtensionError::InvalidKey(e.to_string()))
        }
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        n => Err(ExtensionError::InvalidKey(format!(
            "expected 32 or 64 key bytes, got {n}"
        ))),
    }
}

pub fn public_key_to_pem(key: &VerifyingKey) -> String {
    let mut der = Vec::with_capacity(SPKI_ED25519_PREFIX.len() + 32);
    der.extend_from_slice(&SPKI_ED25519_PREFIX);
    der.extend_from_slice(key.as_bytes());
    format!(
        "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
        STANDARD.encode(der)
    )
}

/// Parse a PEM public key produced by [`public_key_to_pem`].
pub fn public_key_from_pem(pem: &str) -> Result<VerifyingKey> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("-----"))
        .collect();
    let der = STANDARD
        .decode(body)
        .map_err(|e| ExtensionError::InvalidKey(format!("bad PEM body: {e}")))?;

    let raw = der
        .strip_prefix(&SPKI_ED25519_PREFIX[..])
        .ok_or_else(|| ExtensionError::InvalidKey("not an ed25519 public key".to_string()))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| ExtensionError::InvalidKey(format!("expected 32 key bytes, got {}", raw.len())))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| ExtensionError::InvalidKey(e.to_string()))
}

// ---------------------------------------------------------------------------
// RequestSigner
// ---------------------------------------------------------------------------

/// Signature headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub content_digest: String,
    pub signature_input: String,
    pub signature: String,
}

impl SignedHeaders {
    /// Attach the headers to a request.
    pub fn apply(self, req: ApiRequest) -> ApiRequest {
        req.with_header(CONTENT_DIGEST_HEADER, self.content_digest)
            .with_header(SIGNATURE_INPUT_HEADER, self.signature_input)
            .with_header(SIGNATURE_HEADER, self.signature)
    }
}

/// Signs outbound extension requests. Signing never touches the network.
#[derive(Clone)]
pub struct RequestSigner {
    key: SigningKey,
}

impl RequestSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign with the current time as `created`.
    pub fn sign(&self, method: HttpMethod, url: &str, body: &[u8]) -> Result<SignedHeaders> {
        self.sign_at(method, url, body, chrono::Utc::now().timestamp())
    }

    pub fn sign_at(
        &self,
        method: HttpMethod,
        url: &str,
        body: &[u8],
        created: i64,
    ) -> Result<SignedHeaders> {
        let content_digest = content_digest(body);
        let params = format!(
            r#"{COVERED_COMPONENTS};created={created};keyid="{KEY_ID}";alg="ed25519""#
        );
        let base = signature_base(method.as_str(), url, &content_digest, &params);

        let signature = self
            .key
            .try_sign(base.as_bytes())
            .map_err(|e| ExtensionError::Signing(e.to_string()))?;

        Ok(SignedHeaders {
            content_digest,
            signature_input: format!("{SIGNATURE_LABEL}={params}"),
            signature: format!(
                "{SIGNATURE_LABEL}=:{}:",
                STANDARD.encode(signature.to_bytes())
            ),
        })
    }

    /// Sign `req` in place of its current body and URL.
    pub fn sign_request(&self, req: ApiRequest) -> Result<ApiRequest> {
        let body = req.body.clone().unwrap_or_default();
        let headers = self.sign(req.method, &req.url, &body)?;
        Ok(headers.apply(req))
    }
}

/// `sha-512=:<base64>:` digest of a body.
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-512=:{}:", STANDARD.encode(Sha512::digest(body)))
}

fn signature_base(method: &str, url: &str, digest: &str, params: &str) -> String {
    format!(
        "\"@method\": {method}\n\"@target-uri\": {url}\n\"content-digest\": {digest}\n\"@signature-params\": {params}"
    )
}

/// Check the signature headers of a request against `key`.
///
/// Fails with [`ExtensionError::Signing`] when a header is missing, the
/// digest does not match the body or the signature does not verify.
pub fn verify_signature(key: &VerifyingKey, req: &ApiRequest) -> Result<()> {
    let header = |name: &str| {
        req.header(name)
            .ok_or_else(|| ExtensionError::Signing(format!("missing {name} header")))
    };

    let digest = header(CONTENT_DIGEST_HEADER)?;
    let body = req.body.as_deref().unwrap_or_default();
    if digest != content_digest(body) {
        return Err(ExtensionError::Signing("content digest mismatch".to_string()));
    }

    let label = format!("{SIGNATURE_LABEL}=");
    let params = header(SIGNATURE_INPUT_HEADER)?
        .strip_prefix(label.as_str())
        .ok_or_else(|| ExtensionError::Signing("unexpected signature label".to_string()))?;
    if !params.starts_with(COVERED_COMPONENTS) {
        return Err(ExtensionError::Signing("unexpected covered components".to_string()));
    }

    let encoded = header(SIGNATURE_HEADER)?
        .strip_prefix(label.as_str())
        .and_then(|v| v.strip_prefix(':'))
        .and_then(|v| v.strip_suffix(':'))
        .ok_or_else(|| ExtensionError::Signing("malformed signature header".to_string()))?;
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| ExtensionError::Signing(format!("signature not base64: {e}")))?;
    let signature =
        Signature::from_slice(&raw).map_err(|e| ExtensionError::Signing(e.to_string()))?;

    let base = signature_base(req.method.as_str(), &req.url, digest, params);
    key.verify_strict(base.as_bytes(), &signature)
        .map_err(|e| ExtensionError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeline_state::fakes::MemoryServerConfigStore;

    fn provider() -> (Arc<MemoryServerConfigStore>, KeyProvider) {
        let store = Arc::new(MemoryServerConfigStore::new());
        let provider = KeyProvider::new(store.clone());
        (store, provider)
    }

    #[tokio::test]
    async fn first_use_generates_and_persists_key() {
        let (store, provider) = provider();

        let key = provider.signing_key().await.unwrap().clone();
        let persisted = store
            .server_config_get(PRIVATE_KEY_CONFIG_KEY)
            .await
            .unwrap();

        assert_eq!(persisted, hex::encode(key.to_keypair_bytes()));
    }

    #[tokio::test]
    async fn persisted_key_is_reused() {
        let (store, provider) = provider();
        let first = provider.verifying_key().await.unwrap();

        let second = KeyProvider::new(store).verifying_key().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_first_use_yields_one_key() {
        let store = Arc::new(MemoryServerConfigStore::new());
        let providers: Vec<_> = (0..8).map(|_| KeyProvider::new(store.clone())).collect();

        let keys = futures::future::try_join_all(providers.iter().map(|p| p.verifying_key()))
            .await
            .unwrap();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn garbage_key_is_rejected() {
        let (store, provider) = provider();
        store
            .server_config_set(PRIVATE_KEY_CONFIG_KEY, "zz-not-hex")
            .await
            .unwrap();

        let err = provider.signing_key().await.unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidKey(_)));
    }

    #[test]
    fn seed_keys_decode() {
        let key = decode_private_key(&"07".repeat(32)).unwrap();
        assert_eq!(key.to_bytes(), [7u8; 32]);
        assert!(decode_private_key(&"07".repeat(16)).is_err());
    }

    #[test]
    fn pem_round_trip() {
        let key = SigningKey::from_bytes(&[3u8; 32]).verifying_key();
        let pem = public_key_to_pem(&key);

        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\nMCowBQYDK2VwAyEA"));
        assert_eq!(public_key_from_pem(&pem).unwrap(), key);
    }

    #[test]
    fn signature_headers_have_expected_shape() {
        let signer = RequestSigner::new(SigningKey::from_bytes(&[1u8; 32]));
        let headers = signer
            .sign_at(HttpMethod::Post, "https://ext.example.com/config", b"{}", 1_700_000_000)
            .unwrap();

        assert_eq!(headers.content_digest, content_digest(b"{}"));
        assert!(headers.content_digest.starts_with("sha-512=:"));
        assert_eq!(
            headers.signature_input,
            r#"sig1=("@method" "@target-uri" "content-digest");created=1700000000;keyid="forgeline-extensions";alg="ed25519""#
        );
        assert!(headers.signature.starts_with("sig1=:") && headers.signature.ends_with(':'));
    }

    #[test]
    fn signed_request_verifies() {
        let signer = RequestSigner::new(SigningKey::from_bytes(&[9u8; 32]));
        let req = ApiRequest::post("https://ext.example.com/config")
            .with_json(&serde_json::json!({"configs": []}))
            .unwrap();
        let signed = signer.sign_request(req).unwrap();

        verify_signature(&signer.verifying_key(), &signed).unwrap();
    }

    #[test]
    fn tampering_breaks_verification() {
        let signer = RequestSigner::new(SigningKey::from_bytes(&[9u8; 32]));
        let req = ApiRequest::post("https://ext.example.com/config").with_json(&1).unwrap();
        let signed = signer.sign_request(req).unwrap();

        let mut body_changed = signed.clone();
        body_changed.body = Some(b"2".to_vec());
        assert!(verify_signature(&signer.verifying_key(), &body_changed).is_err());

        let mut url_changed = signed.clone();
        url_changed.url = "https://evil.example.com/config".to_string();
        assert!(verify_signature(&signer.verifying_key(), &url_changed).is_err());

        let other = SigningKey::from_bytes(&[8u8; 32]).verifying_key();
        assert!(verify_signature(&other, &signed).is_err());
    }
}

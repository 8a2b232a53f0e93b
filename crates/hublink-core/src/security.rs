//! Credentials and security-token minting
//!
//! A client authenticates with exactly one credential kind. Shared-key
//! credentials can mint fresh tokens on demand, which is what the renewal
//! timer relies on; static tokens and certificates cannot, so the timer is
//! never armed for them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use core::fmt;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime stamped into minted tokens unless overridden.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

// ----------------------------------------------------------------------------
// Security Token
// ----------------------------------------------------------------------------

/// Opaque bearer token presented to the hub.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken(String);

impl SecurityToken {
    pub fn new(value: impl Into<String>) -> Self {
        SecurityToken(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// Token material stays out of logs.
impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityToken(len={})", self.0.len())
    }
}

// ----------------------------------------------------------------------------
// Credential Kinds
// ----------------------------------------------------------------------------

/// Shared-key identity; mints `SharedAccessToken` strings on demand.
#[derive(Clone)]
pub struct SharedKeyCredentials {
    pub device_id: String,
    key: Vec<u8>,
    /// URI of the hub resource the token grants access to.
    pub resource_uri: String,
    /// Lifetime stamped into each minted token.
    pub token_ttl: Duration,
}

impl SharedKeyCredentials {
    pub fn new(
        device_id: impl Into<String>,
        key: impl Into<Vec<u8>>,
        resource_uri: impl Into<String>,
    ) -> Self {
        SharedKeyCredentials {
            device_id: device_id.into(),
            key: key.into(),
            resource_uri: resource_uri.into(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Mint a token valid from `now` for the configured TTL.
    ///
    /// Format: `SharedAccessToken sr=<resource>&sig=<signature>&se=<expiry>`
    /// where the signature is the base64 HMAC-SHA256 of
    /// `"<url-encoded resource>\n<expiry>"` under the shared key, and both
    /// `sr` and `sig` are URL-encoded.
    pub fn mint_token(&self, now: SystemTime) -> SecurityToken {
        let issued = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let expiry = issued + self.token_ttl.as_secs();

        let resource: String =
            form_urlencoded::byte_serialize(self.resource_uri.as_bytes()).collect();

        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(format!("{}\n{}", resource, expiry).as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        let signature: String = form_urlencoded::byte_serialize(signature.as_bytes()).collect();

        SecurityToken::new(format!(
            "SharedAccessToken sr={}&sig={}&se={}",
            resource, signature, expiry
        ))
    }
}

impl fmt::Debug for SharedKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredentials")
            .field("device_id", &self.device_id)
            .field("resource_uri", &self.resource_uri)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

/// Certificate-bound identity; the transport owns the TLS handshake.
#[derive(Clone)]
pub struct CertificateCredentials {
    pub certificate_pem: String,
    private_key_pem: String,
}

impl CertificateCredentials {
    pub fn new(certificate_pem: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        CertificateCredentials {
            certificate_pem: certificate_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }
}

impl fmt::Debug for CertificateCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCredentials")
            .field("certificate_pem_len", &self.certificate_pem.len())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

/// How the client authenticates, and whether its tokens can be renewed
/// without caller involvement.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Mintable shared key; the renewal timer keeps tokens fresh.
    SharedKey(SharedKeyCredentials),
    /// Caller-supplied static token; renewed only by explicit update.
    Token(SecurityToken),
    /// x509 identity; nothing to renew.
    Certificate(CertificateCredentials),
}

impl Credentials {
    pub fn shared_key(
        device_id: impl Into<String>,
        key: impl Into<Vec<u8>>,
        resource_uri: impl Into<String>,
    ) -> Self {
        Credentials::SharedKey(SharedKeyCredentials::new(device_id, key, resource_uri))
    }

    /// True when the credential kind can mint fresh tokens on its own.
    pub fn supports_renewal(&self) -> bool {
        matches!(self, Credentials::SharedKey(_))
    }

    /// Fresh token, when this credential kind can mint one.
    pub fn mint(&self, now: SystemTime) -> Option<SecurityToken> {
        match self {
            Credentials::SharedKey(creds) => Some(creds.mint_token(now)),
            Credentials::Token(_) | Credentials::Certificate(_) => None,
        }
    }
}

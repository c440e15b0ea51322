use anyhow::anyhow;
use hmac::{Hmac, Mac};
use http::{header::AUTHORIZATION, HeaderMap};
use sha2::Sha256;
use tracing::warn;

use crate::{Error, Result};

/// Header carrying the hex HMAC-SHA256 of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-alchemy-signature";
/// Header carrying the shared webhook token.
pub const TOKEN_HEADER: &str = "x-alchemy-token";

/// Verification of inbound provider webhooks.
///
/// With a signing key the body signature must verify. With an auth token the request must
/// present it. With both, both checks must pass. With neither, requests are accepted only when
/// unauthenticated access was explicitly allowed.
#[derive(Clone, Default)]
pub struct WebhookAuth {
    signing_key: Option<String>,
    auth_token: Option<String>,
    allow_unauthenticated: bool,
}

impl std::fmt::Debug for WebhookAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAuth")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("allow_unauthenticated", &self.allow_unauthenticated)
            .finish()
    }
}

impl WebhookAuth {
    /// Create a verifier. Empty strings count as not configured.
    pub fn new(
        signing_key: Option<String>,
        auth_token: Option<String>,
        allow_unauthenticated: bool,
    ) -> Self {
        Self {
            signing_key: signing_key.filter(|k| !k.is_empty()),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            allow_unauthenticated,
        }
    }

    /// True when neither a signing key nor a token is configured.
    pub fn is_unconfigured(&self) -> bool {
        self.signing_key.is_none() && self.auth_token.is_none()
    }

    /// True when requests are accepted without any credentials.
    pub fn is_open(&self) -> bool {
        self.is_unconfigured() && self.allow_unauthenticated
    }

    /// Verify the headers and raw body of a webhook request.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        if self.is_unconfigured() {
            if self.allow_unauthenticated {
                warn!("accepting webhook without verification, no signing key or token configured");
                return Ok(());
            }
            return Err(Error::new_unauthorized(anyhow!(
                "webhook verification is not configured"
            )));
        }
        if let Some(key) = &self.signing_key {
            verify_signature(key, headers, body)?;
        }
        if let Some(token) = &self.auth_token {
            verify_token(token, headers)?;
        }
        Ok(())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: impl http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn verify_signature(key: &str, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let signature = header(headers, SIGNATURE_HEADER)
        .ok_or_else(|| Error::new_unauthorized(anyhow!("missing {SIGNATURE_HEADER}")))?;
    let signature = hex::decode(signature.trim())
        .map_err(|_| Error::new_unauthorized(anyhow!("signature is not hex")))?;
    let mut mac = <Hmac<Sha256>>::new_from_slice(key.as_bytes())
        .map_err(|e| Error::new_app(anyhow!("invalid signing key: {e}")))?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| Error::new_unauthorized(anyhow!("bad signature")))
}

fn verify_token(expected: &str, headers: &HeaderMap) -> Result<()> {
    let presented = header(headers, TOKEN_HEADER).or_else(|| {
        header(headers, AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
    });
    let Some(presented) = presented else {
        return Err(Error::new_unauthorized(anyhow!("missing webhook token")));
    };
    // Both tokens are reduced to equal length MACs and compared by `verify_slice`.
    let token_mac = |token: &str| {
        <Hmac<Sha256>>::new_from_slice(expected.as_bytes())
            .map(|mac| mac.chain_update(token.as_bytes()))
            .map_err(|e| Error::new_app(anyhow!("invalid webhook token: {e}")))
    };
    let expected_tag = token_mac(expected)?.finalize().into_bytes();
    token_mac(presented)?
        .verify_slice(&expected_tag)
        .map_err(|_| Error::new_unauthorized(anyhow!("bad webhook token")))
}

//! Bearer token verification.
//!
//! Tokens are JWTs issued by an external identity provider. They are checked
//! either against a shared HS256 secret or against the provider's published
//! JSON Web Key Set, which is fetched at startup and refreshed in the
//! background.

use anyhow::{Context, Result, bail};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use budgetsync_api::ServiceError;

use crate::config::{AppConfig, KeySource};

/// Claims we read from a verified token.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Identity proven by a bearer token.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    /// The provider's subject; stored as `users.external_id`.
    pub subject: String,
    pub email: Option<String>,
}

type KeyRing = Vec<(Option<String>, DecodingKey)>;

enum Keys {
    Secret(DecodingKey),
    Jwks {
        url: String,
        refresh: Duration,
        ring: RwLock<KeyRing>,
    },
}

#[derive(Clone)]
pub struct IdentityVerifier {
    keys: Arc<Keys>,
    issuer: Option<String>,
    audience: Option<String>,
}

impl IdentityVerifier {
    /// Build a verifier. In JWKS mode the key set is fetched now and a
    /// failure is returned to the caller (startup treats it as fatal).
    pub async fn from_config(config: &AppConfig, http: &reqwest::Client) -> Result<Self> {
        let keys = match &config.keys {
            KeySource::Secret(secret) => Keys::Secret(DecodingKey::from_secret(secret.as_bytes())),
            KeySource::Jwks { url, refresh } => {
                let ring = fetch_jwks(http, url).await?;
                tracing::info!("loaded {} signing keys from {url}", ring.len());
                Keys::Jwks {
                    url: url.clone(),
                    refresh: *refresh,
                    ring: RwLock::new(ring),
                }
            }
        };
        Ok(Self {
            keys: Arc::new(keys),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    /// HS256 verifier with no issuer or audience checks.
    pub fn with_secret(secret: &str) -> Self {
        Self {
            keys: Arc::new(Keys::Secret(DecodingKey::from_secret(secret.as_bytes()))),
            issuer: None,
            audience: None,
        }
    }

    /// Periodically refetch the key set. Failures keep the last good keys.
    pub fn spawn_refresh(&self, http: reqwest::Client) -> Option<tokio::task::JoinHandle<()>> {
        let Keys::Jwks { refresh, .. } = self.keys.as_ref() else {
            return None;
        };
        let period = *refresh;
        let keys = Arc::clone(&self.keys);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Keys::Jwks { url, ring, .. } = keys.as_ref() else {
                    return;
                };
                match fetch_jwks(&http, url).await {
                    Ok(fresh) => {
                        tracing::debug!("refreshed {} signing keys", fresh.len());
                        *ring.write().unwrap_or_else(|e| e.into_inner()) = fresh;
                    }
                    Err(e) => tracing::warn!("JWKS refresh failed, keeping previous keys: {e:#}"),
                }
            }
        }))
    }

    /// Verify a bearer token and return the identity it carries.
    pub fn verify(&self, token: &str) -> Result<VerifiedIdentity, ServiceError> {
        let header = decode_header(token).map_err(|_| invalid_token())?;

        let claims = match self.keys.as_ref() {
            Keys::Secret(key) => {
                let validation = self.validation(Algorithm::HS256);
                decode::<Claims>(token, key, &validation)
            }
            Keys::Jwks { ring, .. } => {
                if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                    return Err(invalid_token());
                }
                let ring = ring.read().unwrap_or_else(|e| e.into_inner());
                if ring.is_empty() {
                    return Err(ServiceError::Unavailable("identity keys not loaded".into()));
                }
                let key = select_key(&ring, header.kid.as_deref()).ok_or_else(invalid_token)?;
                decode::<Claims>(token, key, &self.validation(header.alg))
            }
        }
        .map_err(|e| {
            tracing::debug!("token rejected: {e}");
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthorized("token expired".into())
                }
                _ => invalid_token(),
            }
        })?
        .claims;

        if claims.sub.trim().is_empty() {
            return Err(invalid_token());
        }
        Ok(VerifiedIdentity {
            subject: claims.sub,
            email: claims.email.filter(|e| !e.trim().is_empty()),
        })
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        match &self.issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

fn invalid_token() -> ServiceError {
    ServiceError::Unauthorized("invalid token".into())
}

/// Key matching the token's `kid`; a kid-less token only matches a
/// single-key set.
fn select_key<'a>(ring: &'a KeyRing, kid: Option<&str>) -> Option<&'a DecodingKey> {
    match kid {
        Some(kid) => ring
            .iter()
            .find(|(id, _)| id.as_deref() == Some(kid))
            .map(|(_, key)| key),
        None if ring.len() == 1 => ring.first().map(|(_, key)| key),
        None => None,
    }
}

async fn fetch_jwks(http: &reqwest::Client, url: &str) -> Result<KeyRing> {
    let set: JwkSet = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetching JWKS from {url}"))?
        .error_for_status()
        .with_context(|| format!("fetching JWKS from {url}"))?
        .json()
        .await
        .context("decoding JWKS document")?;

    let ring: KeyRing = set
        .keys
        .iter()
        .filter_map(|jwk| match DecodingKey::from_jwk(jwk) {
            Ok(key) => Some((jwk.common.key_id.clone(), key)),
            Err(e) => {
                tracing::warn!("skipping unusable JWK {:?}: {e}", jwk.common.key_id);
                None
            }
        })
        .collect();
    if ring.is_empty() {
        bail!("JWKS at {url} contains no usable keys");
    }
    Ok(ring)
}

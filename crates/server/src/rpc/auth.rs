// Request authentication for the HTTP transport.
//
// An ordered chain of authenticators; the first that recognizes the request
// supplies the identity. Every authenticated identity also holds `public`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use plaidcloud_rpc_common::types::{AuthIdentity, PUBLIC_SCOPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const MIN_JWT_SECRET_CHARS: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("jwt secret must be at least {MIN_JWT_SECRET_CHARS} characters long")]
    SecretTooShort,

    #[error("invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token is not valid for workspace `{0}`")]
    WorkspaceMismatch(String),

    #[error("system clock is before unix epoch")]
    Clock,
}

/// One way of turning request headers into a caller identity.
pub trait Authenticator: Send + Sync {
    /// `None` when the request carries nothing this authenticator accepts.
    fn authenticate(&self, headers: &HeaderMap) -> Option<AuthIdentity>;
}

#[derive(Clone, Default)]
pub struct AuthChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<A: Authenticator + 'static>(mut self, authenticator: A) -> Self {
        self.authenticators.push(Arc::new(authenticator));
        self
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Option<AuthIdentity> {
        let mut identity = self
            .authenticators
            .iter()
            .find_map(|authenticator| authenticator.authenticate(headers))?;
        identity.scopes.insert(PUBLIC_SCOPE.to_string());
        Some(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }
}

impl std::fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChain").field("authenticators", &self.authenticators.len()).finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    #[serde(default)]
    workspace: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    iat: i64,
    exp: i64,
}

/// HS256 bearer tokens, sent as `Bearer <jwt>` or PlaidCloud's
/// `Bearer_<jwt>[_ws<workspace>]`.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.chars().count() < MIN_JWT_SECRET_CHARS {
            return Err(AuthError::SecretTooShort);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Mint a token for `user`, valid for `ttl_secs`.
    pub fn issue_token<I, S>(
        &self,
        user: &str,
        workspace: Option<&str>,
        scopes: I,
        ttl_secs: i64,
    ) -> Result<String, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let issued_at = current_unix_timestamp()?;
        let claims = AccessClaims {
            sub: user.to_string(),
            workspace: workspace.map(ToOwned::to_owned),
            scopes: scopes.into_iter().map(Into::into).collect(),
            iat: issued_at,
            exp: issued_at + ttl_secs,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    /// Validate a token as it appears after the `Bearer` prefix.
    pub fn validate(&self, credential: &str) -> Result<AuthIdentity, AuthError> {
        match self.decode_claims(credential) {
            Ok(claims) => identity(claims, None),
            Err(error) => {
                // `_ws` may only be a workspace suffix once the whole string failed.
                let Some((token, workspace)) = credential.rsplit_once("_ws") else {
                    return Err(error);
                };
                if workspace.is_empty() {
                    return Err(error);
                }
                identity(self.decode_claims(token)?, Some(workspace))
            }
        }
    }

    fn decode_claims(&self, token: &str) -> Result<AccessClaims, AuthError> {
        Ok(decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?.claims)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<AuthIdentity> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
        let credential = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("Bearer_"))
            .map(str::trim)
            .filter(|credential| !credential.is_empty())?;
        match self.validate(credential) {
            Ok(identity) => Some(identity),
            Err(error) => {
                debug!(%error, "rejected bearer token");
                None
            }
        }
    }
}

fn identity(
    claims: AccessClaims,
    requested_workspace: Option<&str>,
) -> Result<AuthIdentity, AuthError> {
    let workspace = match (claims.workspace, requested_workspace) {
        (Some(granted), Some(requested)) if granted != requested => {
            return Err(AuthError::WorkspaceMismatch(requested.to_string()));
        }
        (granted, requested) => granted.or_else(|| requested.map(ToOwned::to_owned)),
    };
    Ok(AuthIdentity::new(workspace, Some(claims.sub), claims.scopes))
}

fn current_unix_timestamp() -> Result<i64, AuthError> {
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| AuthError::Clock)?;
    i64::try_from(duration.as_secs()).map_err(|_| AuthError::Clock)
}

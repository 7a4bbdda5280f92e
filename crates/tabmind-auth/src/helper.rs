//! Token lifecycle management per server.

use crate::error::{AuthError, AuthResult};
use crate::oauth::{self, ClientCredentials, OAuthEndpoints, OAuthTokens};
use crate::store::{keys, LocalStore};
use crate::unix_time_secs;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Safety margin before actual token expiry.
///
/// A token within this many seconds of expiring is treated as expired
/// so it is refreshed before a request can race the real deadline.
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Tokens persisted per server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp when the access token expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredTokens {
    /// Convert a token endpoint response into a stored record.
    pub fn from_response(tokens: OAuthTokens) -> Self {
        let now = unix_time_secs();
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_in.map(|secs| now + secs),
            scope: tokens.scope,
        }
    }

    /// Whether the access token is still usable given a safety margin.
    ///
    /// Tokens without an expiry never expire locally.
    pub fn is_valid(&self, margin_secs: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > unix_time_secs() + margin_secs,
            None => true,
        }
    }
}

/// Produces currently-valid bearer tokens for servers, refreshing
/// silently when a refresh token is available.
///
/// All state lives in the [`LocalStore`] under the server's key
/// prefix; the helper itself is stateless and cheap to clone.
#[derive(Debug, Clone)]
pub struct AuthHelper {
    store: Arc<LocalStore>,
}

impl AuthHelper {
    /// Create a helper over the given store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Get the stored tokens for a server.
    pub async fn tokens(&self, server_id: &str) -> AuthResult<Option<StoredTokens>> {
        self.store.get(&keys::tokens(server_id)).await
    }

    /// Persist tokens for a server.
    pub async fn save_tokens(&self, server_id: &str, tokens: StoredTokens) -> AuthResult<()> {
        info!(server = %server_id, "Saved tokens");
        self.store.set(&keys::tokens(server_id), &tokens).await
    }

    /// Remove stored tokens for a server.
    pub async fn clear_tokens(&self, server_id: &str) -> AuthResult<()> {
        self.store.remove(&keys::tokens(server_id)).await?;
        Ok(())
    }

    /// Get the stored client credentials for a server.
    pub async fn client_credentials(
        &self,
        server_id: &str,
    ) -> AuthResult<Option<ClientCredentials>> {
        self.store.get(&keys::client(server_id)).await
    }

    /// Persist client credentials for a server.
    pub async fn save_client_credentials(
        &self,
        server_id: &str,
        creds: &ClientCredentials,
    ) -> AuthResult<()> {
        self.store.set(&keys::client(server_id), creds).await
    }

    /// Return a currently-valid access token for a server.
    ///
    /// Returns the cached token when it is not within
    /// [`TOKEN_EXPIRY_MARGIN_SECS`] of expiry; otherwise invokes
    /// `refresh` to obtain fresh tokens, persists them, and returns
    /// the new access token. Returns `None` when no token exists or
    /// refresh fails; the caller must send the user through the
    /// interactive authorization flow.
    pub async fn ensure_valid_token<F, Fut>(
        &self,
        server_id: &str,
        refresh: F,
    ) -> AuthResult<Option<String>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = AuthResult<StoredTokens>>,
    {
        let Some(tokens) = self.tokens(server_id).await? else {
            debug!(server = %server_id, "No stored tokens");
            return Ok(None);
        };

        if tokens.is_valid(TOKEN_EXPIRY_MARGIN_SECS) {
            return Ok(Some(tokens.access_token));
        }

        if tokens.refresh_token.is_none() {
            debug!(server = %server_id, "Token expired with no refresh token");
            return Ok(None);
        }

        match refresh(server_id.to_string()).await {
            Ok(fresh) => {
                let access = fresh.access_token.clone();
                self.save_tokens(server_id, fresh).await?;
                Ok(Some(access))
            }
            Err(e) => {
                warn!(server = %server_id, error = %e, "Token refresh failed, clearing tokens");
                self.clear_tokens(server_id).await?;
                Ok(None)
            }
        }
    }

    /// Exchange the stored refresh token for new tokens.
    ///
    /// On failure (revoked or expired refresh token) the stored
    /// tokens are cleared so the next connection attempt surfaces an
    /// authorization-required error instead of retrying silently.
    pub async fn refresh_server_token(
        &self,
        server_id: &str,
        endpoints: &OAuthEndpoints,
    ) -> AuthResult<StoredTokens> {
        let tokens = self
            .tokens(server_id)
            .await?
            .ok_or_else(|| AuthError::NotAuthorized(server_id.to_string()))?;

        let Some(refresh_token) = tokens.refresh_token else {
            return Err(AuthError::NotAuthorized(server_id.to_string()));
        };

        let creds = self
            .client_credentials(server_id)
            .await?
            .ok_or_else(|| AuthError::NotAuthorized(server_id.to_string()))?;

        match oauth::refresh_tokens(endpoints, &creds, &refresh_token).await {
            Ok(response) => {
                let mut fresh = StoredTokens::from_response(response);
                // Servers may omit the refresh token on rotation
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token);
                }
                self.save_tokens(server_id, fresh.clone()).await?;
                Ok(fresh)
            }
            Err(e) => {
                warn!(server = %server_id, error = %e, "Refresh rejected, clearing tokens");
                self.clear_tokens(server_id).await?;
                Err(e)
            }
        }
    }

    /// Read the persisted enabled flag for a server.
    pub async fn server_enabled(&self, server_id: &str) -> AuthResult<Option<bool>> {
        self.store.get(&keys::enabled(server_id)).await
    }

    /// Persist the enabled flag for a server.
    pub async fn set_server_enabled(&self, server_id: &str, enabled: bool) -> AuthResult<()> {
        self.store.set(&keys::enabled(server_id), &enabled).await
    }
}

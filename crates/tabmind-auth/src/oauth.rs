//! OAuth2 authorization-code endpoint mechanics.
//!
//! Implements the non-interactive half of OAuth 2.0 with PKCE for
//! remote MCP servers: dynamic client registration, authorization-URL
//! construction, authorization-code exchange, refresh, and
//! introspection. Opening the authorization page and collecting the
//! redirect is the UI layer's job.

use crate::error::{AuthError, AuthResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// OAuth endpoint set registered for one MCP server.
///
/// Loaded from the server's static configuration; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthEndpoints {
    /// Dynamic client registration endpoint.
    pub register_url: String,
    /// Authorization endpoint (user-facing page).
    pub auth_url: String,
    /// Token endpoint (code exchange and refresh).
    pub token_url: String,
    /// Token introspection endpoint, if the server offers one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspect_url: Option<String>,
    /// RFC 8707 resource indicator sent with token requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// OAuth client credentials, pre-registered or from dynamic registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Generate a PKCE code verifier.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate the PKCE code challenge for a verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate an OAuth state parameter.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Build the authorization URL the UI should open.
pub fn build_auth_url(
    endpoints: &OAuthEndpoints,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
) -> String {
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
        endpoints.auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    );

    if let Some(scope) = scope {
        url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
    }
    if let Some(ref resource) = endpoints.resource {
        url.push_str(&format!("&resource={}", urlencoding::encode(resource)));
    }

    url
}

/// Register a client dynamically (RFC 7591).
pub async fn register_client(
    endpoints: &OAuthEndpoints,
    client_name: &str,
    redirect_uri: &str,
) -> AuthResult<ClientCredentials> {
    let client = reqwest::Client::new();

    let metadata = serde_json::json!({
        "client_name": client_name,
        "redirect_uris": [redirect_uri],
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "token_endpoint_auth_method": "none",
    });

    let response = client
        .post(&endpoints.register_url)
        .json(&metadata)
        .send()
        .await?;

    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::RegistrationFailed(text));
    }

    let creds: ClientCredentials = response
        .json()
        .await
        .map_err(|e| AuthError::RegistrationFailed(format!("Invalid registration response: {e}")))?;

    Ok(creds)
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    endpoints: &OAuthEndpoints,
    creds: &ClientCredentials,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> AuthResult<OAuthTokens> {
    let client = reqwest::Client::new();

    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", creds.client_id.as_str()),
        ("code_verifier", code_verifier),
    ];

    if let Some(ref secret) = creds.client_secret {
        params.push(("client_secret", secret));
    }
    if let Some(ref resource) = endpoints.resource {
        params.push(("resource", resource));
    }

    let response = client
        .post(&endpoints.token_url)
        .form(&params)
        .send()
        .await?;

    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::ExchangeFailed(text));
    }

    let tokens: OAuthTokens = response
        .json()
        .await
        .map_err(|e| AuthError::ExchangeFailed(format!("Invalid token response: {e}")))?;

    Ok(tokens)
}

/// Exchange a refresh token for new tokens.
pub async fn refresh_tokens(
    endpoints: &OAuthEndpoints,
    creds: &ClientCredentials,
    refresh_token: &str,
) -> AuthResult<OAuthTokens> {
    let client = reqwest::Client::new();

    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", creds.client_id.as_str()),
    ];

    if let Some(ref secret) = creds.client_secret {
        params.push(("client_secret", secret));
    }
    if let Some(ref resource) = endpoints.resource {
        params.push(("resource", resource));
    }

    let response = client
        .post(&endpoints.token_url)
        .form(&params)
        .send()
        .await?;

    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(text));
    }

    let tokens: OAuthTokens = response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("Invalid refresh response: {e}")))?;

    Ok(tokens)
}

/// Check whether a token is still active via introspection (RFC 7662).
///
/// Servers without an introspection endpoint report `true`; expiry is
/// then judged from the stored `expires_at` alone.
pub async fn introspect_token(
    endpoints: &OAuthEndpoints,
    creds: &ClientCredentials,
    token: &str,
) -> AuthResult<bool> {
    let Some(ref introspect_url) = endpoints.introspect_url else {
        return Ok(true);
    };

    let client = reqwest::Client::new();
    let params = vec![("token", token), ("client_id", creds.client_id.as_str())];

    let response = client.post(introspect_url).form(&params).send().await?;

    if !response.status().is_success() {
        return Ok(false);
    }

    #[derive(Deserialize)]
    struct Introspection {
        active: bool,
    }

    let body: Introspection = response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("Invalid introspection response: {e}")))?;

    Ok(body.active)
}

//! Per-server token storage and OAuth support for tabmind.
//!
//! Every remote MCP server tabmind talks to may require its own OAuth
//! authorization. This crate keeps those credentials strictly
//! separated: tokens, client registrations, and the enabled flag for
//! a server all live under a `mcp.<serverId>.` key prefix in one
//! local key-value file, so credentials from different servers never
//! collide or leak across servers.
//!
//! # Components
//!
//! - [`LocalStore`]: namespaced persistent key-value storage.
//! - [`AuthHelper`]: token lifecycle: cached access, silent refresh
//!   with an expiry safety margin, and clearing on revocation.
//! - [`oauth`]: OAuth2 authorization-code + PKCE endpoint mechanics
//!   (registration, authorization URL, code exchange, refresh,
//!   introspection). The interactive part of the flow (opening the
//!   authorization page) is owned by the UI layer, not this crate.
//!
//! # Storage location
//!
//! Credentials are stored in a platform-specific data directory:
//! - Linux: `~/.local/share/tabmind/local-store.json`
//! - macOS: `~/Library/Application Support/tabmind/local-store.json`
//! - Windows: `%APPDATA%/tabmind/local-store.json`
//!
//! The file is created with restrictive permissions (0600 on Unix).

mod error;
mod helper;
pub mod oauth;
mod store;

pub use error::{AuthError, AuthResult};
pub use helper::{AuthHelper, StoredTokens, TOKEN_EXPIRY_MARGIN_SECS};
pub use oauth::{ClientCredentials, OAuthEndpoints, OAuthTokens};
pub use store::{keys, LocalStore};

/// Get the default local store path for the current platform.
///
/// Returns `None` if the data directory cannot be determined.
pub fn default_store_path() -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|p| p.join("tabmind").join("local-store.json"))
}

/// Current time in seconds since the Unix epoch.
pub fn unix_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

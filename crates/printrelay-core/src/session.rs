// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authenticated platform session.
//
// Holds what every outbound call to the platform needs: the instance URL,
// the tenant id, and a `TokenProvider` for the bearer token.  One `Session`
// is built at startup and shared (via `Arc`) by the subscription engine and
// the content resolver.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::Url;
use tracing::warn;

use crate::config::ConfigSource;
use crate::error::{RelayError, Result};

/// Domain suffix of platform-hosted content.
const PLATFORM_DOMAIN_SUFFIX: &str = ".salesforce.com";

/// Source of bearer tokens.  Acquisition and refresh flows live outside
/// the connector; it only consumes this capability.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token.
    fn get_token(&self) -> String;

    /// Try to obtain a fresh token.  Returns `true` if a new token is now
    /// available from [`get_token`](Self::get_token).
    async fn refresh(&self) -> bool;
}

/// A token supplied up front (config file or environment).
pub struct StaticTokenProvider {
    token: RwLock<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Replace the token, e.g. after an operator rotates it.
    pub fn set_token(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token.into();
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn get_token(&self) -> String {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn refresh(&self) -> bool {
        warn!("static access token cannot be refreshed");
        false
    }
}

/// Shared, authenticated platform context.
#[derive(Clone)]
pub struct Session {
    instance_url: String,
    tenant_id: String,
    tokens: Arc<dyn TokenProvider>,
}

impl Session {
    pub fn new(
        instance_url: impl Into<String>,
        tenant_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            tokens,
        }
    }

    /// Build a session from `platform.instance_url` and `platform.tenant_id`.
    pub fn from_config(source: &dyn ConfigSource, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let instance_url = source
            .get("platform.instance_url")
            .ok_or_else(|| RelayError::Config("platform.instance_url is not set".into()))?;
        let tenant_id = source
            .get("platform.tenant_id")
            .ok_or_else(|| RelayError::Config("platform.tenant_id is not set".into()))?;
        Url::parse(&instance_url).map_err(|e| {
            RelayError::Config(format!("platform.instance_url '{instance_url}': {e}"))
        })?;
        Ok(Self::new(instance_url, tenant_id, tokens))
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn access_token(&self) -> String {
        self.tokens.get_token()
    }

    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.tokens
    }

    /// Per-call RPC metadata: `accesstoken`, `instanceurl`, `tenantid`.
    ///
    /// Rebuilt on every call so a refreshed token is picked up.
    pub fn auth_metadata(&self) -> [(&'static str, String); 3] {
        [
            ("accesstoken", self.access_token()),
            ("instanceurl", self.instance_url.clone()),
            ("tenantid", self.tenant_id.clone()),
        ]
    }

    /// Whether `url` points at the authenticated platform (same host as the
    /// instance, or a platform-hosted domain).
    pub fn is_platform_url(&self, url: &str) -> bool {
        if self.instance_url.is_empty() || url.is_empty() {
            return false;
        }
        let Ok(target) = Url::parse(url) else {
            return false;
        };
        let Some(host) = target.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let instance_host = Url::parse(&self.instance_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        instance_host.as_deref() == Some(host.as_str()) || host.ends_with(PLATFORM_DOMAIN_SUFFIX)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_url", &self.instance_url)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

/// Token shortened for logs.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn session() -> Session {
        Session::new(
            "https://acme.my.salesforce.com/",
            "00D000000000001",
            Arc::new(StaticTokenProvider::new("00Dxx!token")),
        )
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(session().instance_url(), "https://acme.my.salesforce.com");
    }

    #[test]
    fn platform_urls_are_recognised() {
        let s = session();
        assert!(s.is_platform_url(
            "https://acme.my.salesforce.com/services/data/v60.0/sobjects/ContentVersion/068/VersionData"
        ));
        assert!(s.is_platform_url("https://acme--c.vf.force.com.salesforce.com/file"));
        assert!(!s.is_platform_url("https://example.com/label.zpl"));
        assert!(!s.is_platform_url("https://example.com/?next=acme.my.salesforce.com"));
        assert!(!s.is_platform_url("not a url"));
    }

    #[test]
    fn metadata_carries_current_token() {
        let provider = Arc::new(StaticTokenProvider::new("first"));
        let s = Session::new("https://acme.my.salesforce.com", "00D1", provider.clone());
        assert_eq!(s.auth_metadata()[0].1, "first");
        provider.set_token("second");
        assert_eq!(s.auth_metadata()[0].1, "second");
        assert_eq!(s.auth_metadata()[2], ("tenantid", "00D1".to_string()));
    }

    #[test]
    fn from_config_requires_instance_and_tenant() {
        let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("t"));
        let mut config = AppConfig::default();
        assert!(Session::from_config(&config, tokens.clone()).is_err());
        config.platform.instance_url = "https://acme.my.salesforce.com".into();
        config.platform.tenant_id = "00D1".into();
        let s = Session::from_config(&config, tokens).unwrap();
        assert_eq!(s.tenant_id(), "00D1");
    }

    #[tokio::test]
    async fn static_provider_never_refreshes() {
        assert!(!StaticTokenProvider::new("t").refresh().await);
    }

    #[test]
    fn redaction_keeps_short_prefix() {
        assert_eq!(redact_token("00Dxx!abcdefgh"), "00Dxx!…");
    }
}

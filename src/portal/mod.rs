//! Vendor portal HTTP API: catalog lookup and attachment resolution.
//!
//! All calls carry the session cookies as a `Cookie` header; there is no cookie
//! jar and no retry. A request either yields a JSON body on HTTP 200 or is
//! reported as a `FetchError` for the caller to log.

pub mod assets;
pub mod catalog;

pub use assets::AttachmentRule;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::session::SessionCookies;

pub(crate) fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("http {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("network: {0}")]
    Net(#[from] reqwest::Error),
    #[error("body is not json: {0}")]
    Body(String),
}

impl FetchError {
    /// HTTP status for log fields; 0 when the request never got a response.
    pub fn status_code(&self) -> u16 {
        match self {
            FetchError::Status { status, .. } => status.as_u16(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Store/locale-scoped API prefix, e.g. `https://portal.example.com/fo-bff/api/priv/v1/store/es-ES`.
    pub api_root: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub attachment_rule: AttachmentRule,
}

/// The two lookups the row processor needs from the portal.
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    /// Canonical product token for a human-readable product name.
    async fn resolve_token(&self, product_name: &str, session: &SessionCookies) -> Option<String>;
    /// URL of the 360° photo for a resolved token.
    async fn resolve_image_url(&self, token: &str, session: &SessionCookies) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct PortalClient {
    http: Client,
    api_root: Url,
    rule: AttachmentRule,
}

impl PortalClient {
    pub fn new(cfg: &PortalConfig) -> Result<Self> {
        let root = cfg.api_root.trim_end_matches('/');
        let api_root =
            Url::parse(root).with_context(|| format!("invalid portal api root `{root}`"))?;
        if api_root.cannot_be_a_base() {
            return Err(anyhow!("portal api root `{root}` cannot carry a path"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .default_headers(headers)
            .user_agent(cfg.user_agent.clone())
            .gzip(true)
            .timeout(cfg.timeout)
            .build()?;

        Ok(Self {
            http,
            api_root,
            rule: cfg.attachment_rule.clone(),
        })
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// `api_root` with `segments` appended, each percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_root.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Resolve an asset path the API may return relative to the portal origin.
    pub(crate) fn absolute(&self, path: &str) -> Option<Url> {
        Url::parse(path)
            .or_else(|_| self.api_root.join("/")?.join(path))
            .ok()
    }

    pub(crate) async fn get_json(
        &self,
        url: Url,
        session: &SessionCookies,
    ) -> Result<Value, FetchError> {
        let mut req = self.http.get(url);
        if !session.is_empty() {
            req = req.header(COOKIE, session.header_value());
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
            return Err(FetchError::Status { status, body });
        }
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| FetchError::Body(e.to_string()))
    }
}

#[async_trait::async_trait]
impl CatalogApi for PortalClient {
    async fn resolve_token(&self, product_name: &str, session: &SessionCookies) -> Option<String> {
        catalog::resolve_token(self, product_name, session).await
    }

    async fn resolve_image_url(&self, token: &str, session: &SessionCookies) -> Option<String> {
        assets::resolve_image_url(self, token, &self.rule, session).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::client_for;
    use super::*;

    #[test]
    fn endpoint_appends_encoded_segments() {
        let c = client_for("http://localhost:1", AttachmentRule::default());
        assert_eq!(
            c.endpoint(&["pages", "identifier", "0a b"]).as_str(),
            "http://localhost:1/fo-bff/api/priv/v1/store/es-ES/pages/identifier/0a%20b"
        );
    }

    #[test]
    fn absolute_handles_relative_and_full_paths() {
        let c = client_for("http://localhost:1", AttachmentRule::default());
        assert_eq!(
            c.absolute("/assets/x.avif").unwrap().as_str(),
            "http://localhost:1/assets/x.avif"
        );
        assert_eq!(
            c.absolute("https://cdn.example.com/x.avif").unwrap().as_str(),
            "https://cdn.example.com/x.avif"
        );
        assert_eq!(
            c.absolute("assets/y.avif").unwrap().as_str(),
            "http://localhost:1/assets/y.avif"
        );
    }

    #[test]
    fn rejects_bad_root() {
        let cfg = PortalConfig {
            api_root: "not a url".into(),
            timeout: Duration::from_secs(1),
            user_agent: "t".into(),
            attachment_rule: AttachmentRule::default(),
        };
        assert!(PortalClient::new(&cfg).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("ñañaña".into(), 3), "ñ…");
        assert_eq!(truncate_for_log("short".into(), 10), "short");
    }
}

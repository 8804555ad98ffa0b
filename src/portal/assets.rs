use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use super::PortalClient;
use crate::session::SessionCookies;

/// Attachment type filter sent with every listing request.
pub const PHOTO_360_TYPE: &str = "PHOTO_360";
const ASSET_PATH_FIELD: &str = "attachmentAssetPath";

/// Which attachment in the 360° listing is the product image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentRule {
    /// Zero-based index into the listing.
    Position(usize),
    /// First attachment whose string field `key` equals `value`, ignoring case.
    Field { key: String, value: String },
}

impl Default for AttachmentRule {
    /// The portal currently lists the usable frame second.
    fn default() -> Self {
        AttachmentRule::Position(1)
    }
}

impl fmt::Display for AttachmentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentRule::Position(i) => write!(f, "position:{i}"),
            AttachmentRule::Field { key, value } => write!(f, "{key}={value}"),
        }
    }
}

impl FromStr for AttachmentRule {
    type Err = String;

    /// `position:N`, a bare `N`, or `key=value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let idx = s.strip_prefix("position:").unwrap_or(s);
        if let Ok(i) = idx.trim().parse::<usize>() {
            return Ok(AttachmentRule::Position(i));
        }
        match s.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                Ok(AttachmentRule::Field {
                    key: k.trim().to_string(),
                    value: v.trim().to_string(),
                })
            }
            _ => Err(format!(
                "invalid attachment rule `{s}` (expected `position:N` or `key=value`)"
            )),
        }
    }
}

impl AttachmentRule {
    pub fn select<'a>(&self, attachments: &'a [Value]) -> Option<&'a Value> {
        match self {
            AttachmentRule::Position(i) => attachments.get(*i),
            AttachmentRule::Field { key, value } => attachments.iter().find(|a| {
                a.get(key)
                    .and_then(|v| v.as_str())
                    .map(|v| v.eq_ignore_ascii_case(value))
                    .unwrap_or(false)
            }),
        }
    }
}

/// `data.catalogEntryView[0].attachments`, if present.
pub fn attachments_of(body: &Value) -> Option<&[Value]> {
    body.pointer("/data/catalogEntryView/0/attachments")
        .and_then(|a| a.as_array())
        .map(Vec::as_slice)
}

pub async fn resolve_image_url(
    client: &PortalClient,
    token: &str,
    rule: &AttachmentRule,
    session: &SessionCookies,
) -> Option<String> {
    let mut url = client.endpoint(&["products", "variants", token, "attachments"]);
    url.query_pairs_mut().append_pair("type", PHOTO_360_TYPE);

    let body = match client.get_json(url, session).await {
        Ok(body) => body,
        Err(e) => {
            warn!(%token, status = e.status_code(), error = %e, "attachment listing failed");
            return None;
        }
    };

    let Some(attachments) = attachments_of(&body) else {
        warn!(%token, status = 200, "attachment listing has no attachments field");
        return None;
    };

    let Some(chosen) = rule.select(attachments) else {
        warn!(%token, %rule, available = attachments.len(), "no attachment matches rule");
        return None;
    };

    let path = chosen
        .get(ASSET_PATH_FIELD)
        .and_then(|p| p.as_str())
        .filter(|p| !p.trim().is_empty());
    let Some(path) = path else {
        warn!(%token, %rule, "selected attachment has no asset path");
        return None;
    };

    match client.absolute(path) {
        Some(abs) => {
            debug!(%token, url = %abs, "image url resolved");
            Some(abs.to_string())
        }
        None => {
            warn!(%token, path, "asset path is not a usable url");
            None
        }
    }
}

use serde_json::Value;
use tracing::{debug, warn};

use super::PortalClient;
use crate::session::SessionCookies;

/// Leading character the portal prepends to every page identifier.
const IDENTIFIER_PREFIX: char = '0';

/// Variant A: spaces and slashes become hyphens.
pub fn identifier_hyphenated(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    out.push(IDENTIFIER_PREFIX);
    out.push_str(&name.replace([' ', '/'], "-").to_lowercase());
    out
}

/// Variant B: spaces become hyphens, slashes are dropped.
pub fn identifier_slashless(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    out.push(IDENTIFIER_PREFIX);
    out.push_str(&name.replace(' ', "-").replace('/', "").to_lowercase());
    out
}

/// Candidate identifiers in query order, without duplicates.
pub fn identifier_candidates(name: &str) -> Vec<String> {
    let a = identifier_hyphenated(name);
    let b = identifier_slashless(name);
    if a == b {
        vec![a]
    } else {
        vec![a, b]
    }
}

/// `data.contents[0].tokenValue` when `contents` is a non-empty listing.
pub fn token_from_page(body: &Value) -> Option<String> {
    body.get("data")
        .and_then(|d| d.get("contents"))
        .and_then(|c| c.as_array())
        .and_then(|items| items.first())
        .and_then(|first| first.get("tokenValue"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .map(|t| t.to_string())
}

/// Try each identifier variant in order; the first page with content wins.
/// Every failure mode is inconclusive and falls through to the next variant.
pub async fn resolve_token(
    client: &PortalClient,
    product_name: &str,
    session: &SessionCookies,
) -> Option<String> {
    for candidate in identifier_candidates(product_name) {
        let url = client.endpoint(&["pages", "identifier", &candidate]);
        match client.get_json(url, session).await {
            Ok(body) => match token_from_page(&body) {
                Some(token) => {
                    debug!(name = product_name, %candidate, %token, "catalog token resolved");
                    return Some(token);
                }
                None => {
                    debug!(name = product_name, %candidate, "catalog page has no contents");
                }
            },
            Err(e) => {
                warn!(
                    name = product_name,
                    %candidate,
                    status = e.status_code(),
                    error = %e,
                    "catalog lookup inconclusive"
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::test_support::{client_for, session};
    use crate::portal::AttachmentRule;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGES: &str = "/fo-bff/api/priv/v1/store/es-ES/pages/identifier";

    #[test]
    fn identifier_variants() {
        assert_eq!(identifier_hyphenated("RB3025 Aviator/Large"), "0rb3025-aviator-large");
        assert_eq!(identifier_slashless("RB3025 Aviator/Large"), "0rb3025-aviatorlarge");
        assert_eq!(identifier_candidates("Foo Bar"), vec!["0foo-bar".to_string()]);
        assert_eq!(identifier_candidates("A/B").len(), 2);
    }

    #[test]
    fn token_requires_non_empty_contents() {
        assert_eq!(
            token_from_page(&json!({"data": {"contents": [{"tokenValue": "T1"}, {"tokenValue": "T2"}]}})),
            Some("T1".into())
        );
        assert_eq!(token_from_page(&json!({"data": {"contents": []}})), None);
        assert_eq!(token_from_page(&json!({"data": {}})), None);
        assert_eq!(token_from_page(&json!({"data": {"contents": [{}]}})), None);
    }

    #[tokio::test]
    async fn first_variant_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{PAGES}/0a-b")))
            .and(header("cookie", "sid=1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"contents": [{"tokenValue": "TOK-A"}]}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{PAGES}/0ab")))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), AttachmentRule::default());
        assert_eq!(resolve_token(&client, "A/B", &session()).await, Some("TOK-A".into()));
    }

    #[tokio::test]
    async fn falls_back_to_second_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{PAGES}/0a-b")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{PAGES}/0ab")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"contents": [{"tokenValue": "TOK-B"}]}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), AttachmentRule::default());
        assert_eq!(resolve_token(&client, "A/B", &session()).await, Some("TOK-B".into()));
    }

    #[tokio::test]
    async fn malformed_and_empty_bodies_are_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{PAGES}/0a-b")))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{PAGES}/0ab")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), AttachmentRule::default());
        assert_eq!(resolve_token(&client, "A/B", &session()).await, None);
    }
}

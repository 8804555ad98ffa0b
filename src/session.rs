//! Authenticated portal session acquisition.
//!
//! Logging in is delegated: either an operator drops an exported cookie file in
//! place, or an external login helper (typically a headless browser script)
//! prints the session cookies on stdout.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("login helper exited with {status}: {stderr}")]
    HelperFailed { status: String, stderr: String },
    #[error("login helper timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed cookie payload: {0}")]
    Malformed(String),
    #[error("session payload contained no cookies")]
    Empty,
}

/// Cookie name -> value for one run. Values never appear in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionCookies(BTreeMap<String, String>);

impl SessionCookies {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Cookie` request header value.
    pub fn header_value(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookies")
            .field("names", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SessionCookies {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Deserialize)]
struct BrowserCookie {
    name: String,
    value: String,
}

/// Accepts a JSON object `{name: value}`, a JSON array of `{name, value, ...}`
/// (browser export shape), or a raw `Cookie` header `a=1; b=2`.
pub fn parse_cookie_payload(raw: &str) -> Result<SessionCookies, SessionError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(SessionError::Empty);
    }

    let cookies: SessionCookies = if text.starts_with('{') || text.starts_with('[') {
        let v: Value =
            serde_json::from_str(text).map_err(|e| SessionError::Malformed(e.to_string()))?;
        match v {
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
            Value::Array(_) => {
                let list: Vec<BrowserCookie> = serde_json::from_value(v)
                    .map_err(|e| SessionError::Malformed(e.to_string()))?;
                list.into_iter().map(|c| (c.name, c.value)).collect()
            }
            _ => return Err(SessionError::Malformed("unexpected json type".into())),
        }
    } else {
        let mut out = BTreeMap::new();
        for pair in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| SessionError::Malformed(format!("no `=` in `{pair}`")))?;
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
        SessionCookies(out)
    };

    if cookies.is_empty() {
        return Err(SessionError::Empty);
    }
    Ok(cookies)
}

#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn acquire(&self) -> Result<SessionCookies, SessionError>;
}

/// Cookies exported to a file by an operator or an earlier login step.
#[derive(Debug, Clone)]
pub struct CookieFileSession {
    pub path: PathBuf,
}

#[async_trait::async_trait]
impl SessionProvider for CookieFileSession {
    fn name(&self) -> &'static str {
        "cookie_file"
    }

    async fn acquire(&self) -> Result<SessionCookies, SessionError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let cookies = parse_cookie_payload(&raw)?;
        info!(path = %self.path.display(), cookies = cookies.len(), "session loaded from cookie file");
        Ok(cookies)
    }
}

/// Runs an external login helper and reads the cookies it prints on stdout.
#[derive(Debug, Clone)]
pub struct LoginHelperSession {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl LoginHelperSession {
    /// Split a configured command line on whitespace.
    pub fn from_command_line(cmd: &str, timeout: Duration) -> Option<Self> {
        let mut parts = cmd.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }
}

/// Logs when the helper's scope ends, whichever path it ends on.
struct HelperScope<'a> {
    program: &'a str,
}

impl Drop for HelperScope<'_> {
    fn drop(&mut self) {
        info!(program = self.program, "login helper closed");
    }
}

#[async_trait::async_trait]
impl SessionProvider for LoginHelperSession {
    fn name(&self) -> &'static str {
        "login_helper"
    }

    async fn acquire(&self) -> Result<SessionCookies, SessionError> {
        let _scope = HelperScope {
            program: &self.program,
        };
        debug!(program = %self.program, "starting login helper");
        // kill_on_drop: the child dies with the future on timeout or error.
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SessionError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::HelperFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let cookies = parse_cookie_payload(&stdout)?;
        info!(cookies = cookies.len(), "session established via login helper");
        Ok(cookies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_payload() {
        let c = parse_cookie_payload(r#"{"JSESSIONID":"abc","n":1}"#).unwrap();
        assert_eq!(c.header_value(), "JSESSIONID=abc; n=1");
    }

    #[test]
    fn parses_browser_export_array() {
        let c = parse_cookie_payload(
            r#"[{"name":"a","value":"1","domain":".example.com"},{"name":"b","value":"2"}]"#,
        )
        .unwrap();
        assert_eq!(c.header_value(), "a=1; b=2");
    }

    #[test]
    fn parses_header_string() {
        let c = parse_cookie_payload("a=1; b=x=y;").unwrap();
        assert_eq!(c.header_value(), "a=1; b=x=y");
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(matches!(parse_cookie_payload("  "), Err(SessionError::Empty)));
        assert!(matches!(parse_cookie_payload("{}"), Err(SessionError::Empty)));
        assert!(matches!(
            parse_cookie_payload("novalue"),
            Err(SessionError::Malformed(_))
        ));
        assert!(matches!(
            parse_cookie_payload("[{\"nom\":1}]"),
            Err(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn debug_hides_values() {
        let c: SessionCookies = [("token", "s3cret")].into_iter().collect();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("token"));
        assert!(!dbg.contains("s3cret"));
    }

    #[tokio::test]
    async fn cookie_file_session_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, r#"{"sid":"1"}"#).unwrap();
        let c = CookieFileSession { path }.acquire().await.unwrap();
        assert_eq!(c.header_value(), "sid=1");
    }

    #[tokio::test]
    async fn cookie_file_session_missing_file_is_io_error() {
        let err = CookieFileSession {
            path: PathBuf::from("/nonexistent/cookies.json"),
        }
        .acquire()
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn login_helper_stdout_becomes_session() {
        let helper = LoginHelperSession {
            program: "sh".into(),
            args: vec!["-c".into(), r#"echo '{"sid":"42"}'"#.into()],
            timeout: Duration::from_secs(10),
        };
        let c = helper.acquire().await.unwrap();
        assert_eq!(c.header_value(), "sid=42");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn login_helper_failure_and_timeout() {
        let failing = LoginHelperSession {
            program: "sh".into(),
            args: vec!["-c".into(), "echo denied >&2; exit 3".into()],
            timeout: Duration::from_secs(10),
        };
        match failing.acquire().await.unwrap_err() {
            SessionError::HelperFailed { stderr, .. } => assert_eq!(stderr, "denied"),
            other => panic!("unexpected {other:?}"),
        }

        let slow = LoginHelperSession {
            program: "sleep".into(),
            args: vec!["5".into()],
            timeout: Duration::from_millis(100),
        };
        assert!(matches!(
            slow.acquire().await.unwrap_err(),
            SessionError::Timeout(_)
        ));
    }

    #[test]
    fn command_line_split() {
        let h = LoginHelperSession::from_command_line(
            "node login.js --headless",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(h.program, "node");
        assert_eq!(h.args, vec!["login.js", "--headless"]);
        assert!(LoginHelperSession::from_command_line("   ", Duration::from_secs(1)).is_none());
    }
}

//! Job configuration, read once from the environment at startup and passed down.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::materialize::ConverterConfig;
use crate::notify::SmtpConfig;
use crate::portal::{AttachmentRule, PortalConfig};
use crate::processor::DEFAULT_FLUSH_EVERY;
use crate::util::env::{env_opt, env_parse, env_req, preflight_check};

#[derive(Debug, Clone)]
pub enum SessionSource {
    CookieFile(PathBuf),
    LoginHelper { command: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub input_csv: PathBuf,
    pub checkpoint_file: PathBuf,
    pub checkpoint_snapshot: PathBuf,
    pub final_snapshot: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub recipient: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub paths: OutputPaths,
    pub flush_every: usize,
    pub portal: PortalConfig,
    pub session: SessionSource,
    pub converter: ConverterConfig,
    pub notify: NotifyConfig,
}

const REQUIRED: &[&str] = &["PORTAL_API_ROOT"];
const LOGGED: &[&str] = &[
    "ETL_INPUT_CSV",
    "ETL_CHECKPOINT_FILE",
    "ETL_CHECKPOINT_SNAPSHOT",
    "ETL_FINAL_SNAPSHOT",
    "ETL_IMAGE_DIR",
    "ETL_FLUSH_EVERY",
    "PORTAL_TIMEOUT_SECS",
    "PORTAL_USER_AGENT",
    "PORTAL_ATTACHMENT_RULE",
    "PORTAL_COOKIE_FILE",
    "PORTAL_LOGIN_COMMAND",
    "PORTAL_LOGIN_TIMEOUT_SECS",
    "IMAGE_CONVERTER",
    "IMAGE_SOURCE_EXT",
    "IMAGE_TARGET_EXT",
    "SMTP_HOST",
    "SMTP_PORT",
    "SMTP_USERNAME",
    "SMTP_PASSWORD",
    "NOTIFY_FROM",
    "NOTIFY_TO",
    "LOG_FILE",
];

fn path_or(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_opt(key).unwrap_or_else(|| default.to_string()))
}

impl JobConfig {
    /// Input and checkpoint locations only; enough for the checkpoint subcommands.
    pub fn paths_from_env() -> OutputPaths {
        OutputPaths {
            input_csv: path_or("ETL_INPUT_CSV", "products.csv"),
            checkpoint_file: path_or("ETL_CHECKPOINT_FILE", "last_processed_sku.txt"),
            checkpoint_snapshot: path_or("ETL_CHECKPOINT_SNAPSHOT", "images_checkpoint.csv"),
            final_snapshot: path_or("ETL_FINAL_SNAPSHOT", "images_final.csv"),
        }
    }

    pub fn portal_from_env() -> Result<PortalConfig> {
        let attachment_rule = match env_opt("PORTAL_ATTACHMENT_RULE") {
            Some(raw) => raw.parse::<AttachmentRule>().map_err(|e| anyhow!(e))?,
            None => AttachmentRule::default(),
        };
        Ok(PortalConfig {
            api_root: env_req("PORTAL_API_ROOT")?,
            timeout: Duration::from_secs(env_parse("PORTAL_TIMEOUT_SECS", 30u64)),
            user_agent: env_opt("PORTAL_USER_AGENT")
                .unwrap_or_else(|| concat!("portal-image-etl/", env!("CARGO_PKG_VERSION")).into()),
            attachment_rule,
        })
    }

    pub fn session_from_env() -> Result<SessionSource> {
        if let Some(cmd) = env_opt("PORTAL_LOGIN_COMMAND") {
            return Ok(SessionSource::LoginHelper {
                command: cmd,
                timeout: Duration::from_secs(env_parse("PORTAL_LOGIN_TIMEOUT_SECS", 120u64)),
            });
        }
        if let Some(path) = env_opt("PORTAL_COOKIE_FILE") {
            return Ok(SessionSource::CookieFile(PathBuf::from(path)));
        }
        Err(anyhow!(
            "no session source: set PORTAL_LOGIN_COMMAND or PORTAL_COOKIE_FILE"
        ))
    }

    fn notify_from_env() -> Result<NotifyConfig> {
        let smtp = match env_opt("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: env_parse("SMTP_PORT", 465u16),
                username: env_req("SMTP_USERNAME")?,
                password: env_req("SMTP_PASSWORD")?,
                from: env_opt("NOTIFY_FROM").map_or_else(|| env_req("SMTP_USERNAME"), Ok)?,
            }),
            None => None,
        };
        Ok(NotifyConfig {
            recipient: env_opt("NOTIFY_TO"),
            smtp,
        })
    }

    pub fn from_env() -> Result<Self> {
        preflight_check("portal-image-etl", REQUIRED, LOGGED)?;
        Ok(Self {
            paths: Self::paths_from_env(),
            flush_every: env_parse("ETL_FLUSH_EVERY", DEFAULT_FLUSH_EVERY).max(1),
            portal: Self::portal_from_env()?,
            session: Self::session_from_env()?,
            converter: ConverterConfig {
                image_dir: path_or("ETL_IMAGE_DIR", "images"),
                program: env_opt("IMAGE_CONVERTER").unwrap_or_else(|| "convert".into()),
                source_ext: env_opt("IMAGE_SOURCE_EXT").unwrap_or_else(|| "avif".into()),
                target_ext: env_opt("IMAGE_TARGET_EXT").unwrap_or_else(|| "png".into()),
            },
            notify: Self::notify_from_env()?,
        })
    }
}

//! Download a raw asset and convert it to the display format with an external tool.
//!
//! Asset URLs may point off-portal, so downloads never carry the session cookies.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("converter `{program}` could not start: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("converter `{program}` exited with {status}: {stderr}")]
    Convert {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Turn an asset URL into a local display-format file.
#[async_trait::async_trait]
pub trait Materializer: Send + Sync {
    /// `Ok(None)` when the asset could not be downloaded; `Err` when the
    /// download succeeded but writing or converting it failed.
    async fn materialize(&self, url: &str, sku: &str) -> Result<Option<PathBuf>, MaterializeError>;
}

/// Filename stem for a SKU: path separators and spaces become `_`.
pub fn sanitize_sku(sku: &str) -> String {
    sku.replace(['/', ' '], "_")
}

#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub image_dir: PathBuf,
    /// External program invoked as `<program> <source> <target>`.
    pub program: String,
    pub source_ext: String,
    pub target_ext: String,
}

impl ConverterConfig {
    /// Where the converted image for `sku` lands.
    pub fn target_path(&self, sku: &str) -> PathBuf {
        self.image_dir
            .join(format!("{}.{}", sanitize_sku(sku), self.target_ext))
    }

    fn source_path(&self, sku: &str) -> PathBuf {
        self.image_dir
            .join(format!("{}.{}", sanitize_sku(sku), self.source_ext))
    }
}

#[derive(Debug, Clone)]
pub struct HttpMaterializer {
    http: Client,
    cfg: ConverterConfig,
}

impl HttpMaterializer {
    pub fn new(http: Client, cfg: ConverterConfig) -> Self {
        Self { http, cfg }
    }

    async fn convert(&self, src: &Path, dst: &Path) -> Result<(), MaterializeError> {
        let output = Command::new(&self.cfg.program)
            .arg(src)
            .arg(dst)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| MaterializeError::Spawn {
                program: self.cfg.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MaterializeError::Convert {
                program: self.cfg.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .chars()
                    .take(500)
                    .collect(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Materializer for HttpMaterializer {
    async fn materialize(&self, url: &str, sku: &str) -> Result<Option<PathBuf>, MaterializeError> {
        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%sku, %url, error = %e, "image download failed");
                return Ok(None);
            }
        };
        let status = resp.status();
        if status != StatusCode::OK {
            warn!(%sku, %url, status = status.as_u16(), "image download rejected");
            return Ok(None);
        }
        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(%sku, %url, error = %e, "image download interrupted");
                return Ok(None);
            }
        };

        let dir = &self.cfg.image_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| MaterializeError::Io {
                path: dir.clone(),
                source,
            })?;
        let (src, dst) = (self.cfg.source_path(sku), self.cfg.target_path(sku));
        tokio::fs::write(&src, &bytes)
            .await
            .map_err(|source| MaterializeError::Io {
                path: src.clone(),
                source,
            })?;
        debug!(%sku, path = %src.display(), bytes = bytes.len(), "asset downloaded");

        self.convert(&src, &dst).await?;
        Ok(Some(dst))
    }
}

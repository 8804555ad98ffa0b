//! The incremental, resumable row-processing loop.
//!
//! Rows are visited strictly in dataset order. Every row that is not covered by
//! the resume plan advances the checkpoint, whether or not its image resolved,
//! so a rerun never retries a row that keeps failing. The dataset is snapshotted
//! every `flush_every` rows (by 1-based position) and once at the end.
//!
//! Covered parent rows that already carry an image (restored from an earlier
//! run's output) seed the parent cache, so their children still inherit.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, ResumePlan};
use crate::dataset::{Dataset, SnapshotSink};
use crate::materialize::Materializer;
use crate::portal::CatalogApi;
use crate::session::SessionCookies;

pub const DEFAULT_FLUSH_EVERY: usize = 10;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub processed: usize,
    pub resolved: usize,
    pub inherited: usize,
    pub catalog_misses: usize,
    pub asset_misses: usize,
    pub download_misses: usize,
    pub conversion_failures: usize,
    /// Child rows whose parent had no cached image when they were visited.
    pub orphans: usize,
    /// Parent images carried over from rows handled by an earlier run.
    pub restored: usize,
    pub checkpoint_snapshots: usize,
    pub last_checkpoint: Option<String>,
}

/// Parent SKU -> local image path, for the current run only.
pub type ImagePathCache = HashMap<String, String>;

enum Resolution {
    Resolved(String),
    CatalogMiss,
    AssetMiss,
    DownloadMiss,
    ConversionFailed,
}

pub struct RowProcessor<'a> {
    catalog: &'a dyn CatalogApi,
    materializer: &'a dyn Materializer,
    checkpoint: &'a mut dyn CheckpointStore,
    snapshots: &'a mut dyn SnapshotSink,
    flush_every: usize,
    cache: ImagePathCache,
}

impl<'a> RowProcessor<'a> {
    pub fn new(
        catalog: &'a dyn CatalogApi,
        materializer: &'a dyn Materializer,
        checkpoint: &'a mut dyn CheckpointStore,
        snapshots: &'a mut dyn SnapshotSink,
    ) -> Self {
        Self {
            catalog,
            materializer,
            checkpoint,
            snapshots,
            flush_every: DEFAULT_FLUSH_EVERY,
            cache: ImagePathCache::new(),
        }
    }

    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n.max(1);
        self
    }

    pub fn cache(&self) -> &ImagePathCache {
        &self.cache
    }

    /// Process every row not covered by `plan`, then write the final snapshot.
    pub async fn run(
        &mut self,
        dataset: &mut Dataset,
        session: &SessionCookies,
        plan: &ResumePlan,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            total: dataset.len(),
            ..RunSummary::default()
        };
        summary.restored = self.seed_from_covered(dataset, plan);
        info!(
            rows = dataset.len(),
            plan = ?plan,
            restored = summary.restored,
            "processing dataset"
        );

        for index in 0..dataset.len() {
            let Some(rec) = dataset.get(index) else {
                break;
            };
            let sku = rec.sku.clone();
            if plan.covers(index, &sku) {
                summary.skipped += 1;
                continue;
            }

            match rec.parent_sku.clone() {
                None => {
                    let name = rec.name.clone();
                    match self.resolve_primary(&sku, &name, session).await {
                        Resolution::Resolved(path) => {
                            dataset.set_base_image(index, &path);
                            let children = dataset.propagate_to_children(&sku, &path);
                            debug!(%sku, %path, children, "image resolved");
                            self.cache.insert(sku.clone(), path);
                            summary.resolved += 1;
                        }
                        Resolution::CatalogMiss => summary.catalog_misses += 1,
                        Resolution::AssetMiss => summary.asset_misses += 1,
                        Resolution::DownloadMiss => summary.download_misses += 1,
                        Resolution::ConversionFailed => summary.conversion_failures += 1,
                    }
                }
                Some(parent) => match self.cache.get(&parent) {
                    Some(path) => {
                        dataset.set_base_image(index, path);
                        summary.inherited += 1;
                    }
                    None => {
                        debug!(%sku, %parent, "parent image not available; left unresolved");
                        summary.orphans += 1;
                    }
                },
            }

            self.checkpoint
                .save(&sku)
                .with_context(|| format!("persist checkpoint after {sku}"))?;
            summary.processed += 1;
            summary.last_checkpoint = Some(sku);

            let position = index + 1;
            if position % self.flush_every == 0 {
                self.snapshots
                    .write_checkpoint(dataset)
                    .context("write checkpoint snapshot")?;
                summary.checkpoint_snapshots += 1;
                info!(
                    row = position,
                    processed = summary.processed,
                    resolved = summary.resolved,
                    "checkpoint snapshot written"
                );
            }
        }

        self.snapshots
            .write_final(dataset)
            .context("write final snapshot")?;
        info!(?summary, "run complete");
        Ok(summary)
    }

    fn seed_from_covered(&mut self, dataset: &mut Dataset, plan: &ResumePlan) -> usize {
        let seeds: Vec<(String, String)> = dataset
            .records()
            .iter()
            .enumerate()
            .filter(|(i, r)| {
                r.parent_sku.is_none() && !r.base_image.is_empty() && plan.covers(*i, &r.sku)
            })
            .map(|(_, r)| (r.sku.clone(), r.base_image.clone()))
            .collect();
        for (sku, path) in &seeds {
            dataset.propagate_to_children(sku, path);
            self.cache.insert(sku.clone(), path.clone());
        }
        seeds.len()
    }

    async fn resolve_primary(
        &self,
        sku: &str,
        name: &str,
        session: &SessionCookies,
    ) -> Resolution {
        let Some(token) = self.catalog.resolve_token(name, session).await else {
            error!(%sku, %name, "no catalog data for product");
            return Resolution::CatalogMiss;
        };
        let Some(url) = self.catalog.resolve_image_url(&token, session).await else {
            error!(%sku, %name, %token, "no 360 photo for product");
            return Resolution::AssetMiss;
        };
        match self.materializer.materialize(&url, sku).await {
            Ok(Some(path)) => Resolution::Resolved(path.to_string_lossy().into_owned()),
            Ok(None) => {
                warn!(%sku, %name, %url, "image download failed");
                Resolution::DownloadMiss
            }
            Err(e) => {
                error!(%sku, %name, %url, error = %e, "image conversion failed");
                Resolution::ConversionFailed
            }
        }
    }
}

//! Wires configuration and collaborators into one run and decides what is fatal.

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointStore, FileCheckpoint, ResumePlan};
use crate::config::{JobConfig, NotifyConfig, SessionSource};
use crate::dataset::{CsvSnapshots, Dataset};
use crate::materialize::HttpMaterializer;
use crate::notify::{LogNotifier, Notification, Notifier, SmtpNotifier};
use crate::portal::{CatalogApi, PortalClient};
use crate::processor::{RowProcessor, RunSummary};
use crate::session::{CookieFileSession, LoginHelperSession, SessionCookies, SessionProvider};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore any stored checkpoint and process every row.
    pub from_start: bool,
}

pub fn session_provider(source: &SessionSource) -> Result<Box<dyn SessionProvider>> {
    Ok(match source {
        SessionSource::CookieFile(path) => Box::new(CookieFileSession { path: path.clone() }),
        SessionSource::LoginHelper { command, timeout } => Box::new(
            LoginHelperSession::from_command_line(command, *timeout)
                .context("PORTAL_LOGIN_COMMAND is empty")?,
        ),
    })
}

pub async fn acquire_session(source: &SessionSource) -> Result<SessionCookies> {
    let provider = session_provider(source)?;
    provider
        .acquire()
        .await
        .with_context(|| format!("could not establish a portal session via {}", provider.name()))
}

fn notifier(cfg: &NotifyConfig) -> Box<dyn Notifier> {
    match &cfg.smtp {
        Some(smtp) => Box::new(SmtpNotifier::new(smtp.clone())),
        None => Box::new(LogNotifier),
    }
}

/// Carry `base_image` over for rows an earlier run already handled: first from
/// that run's snapshots, then from converted images still on disk.
fn restore_previous_output(dataset: &mut Dataset, plan: &ResumePlan, cfg: &JobConfig) -> usize {
    if *plan == ResumePlan::FromStart {
        return 0;
    }
    let mut filled = 0;
    for path in [&cfg.paths.final_snapshot, &cfg.paths.checkpoint_snapshot] {
        if !path.exists() {
            continue;
        }
        match Dataset::load(path) {
            Ok(previous) => {
                filled += dataset.restore_images(&previous, |i, sku| plan.covers(i, sku));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "earlier snapshot unreadable"),
        }
    }

    let on_disk: Vec<(usize, String)> = dataset
        .records()
        .iter()
        .enumerate()
        .filter(|(i, r)| {
            r.parent_sku.is_none() && r.base_image.is_empty() && plan.covers(*i, &r.sku)
        })
        .filter_map(|(i, r)| {
            let png = cfg.converter.target_path(&r.sku);
            png.is_file().then(|| (i, png.to_string_lossy().into_owned()))
        })
        .collect();
    for (i, png) in &on_disk {
        dataset.set_base_image(*i, png);
    }
    filled += on_disk.len();

    if filled > 0 {
        info!(rows = filled, "restored images from earlier run");
    }
    filled
}

/// One complete run: session, dataset, resume plan, row loop, notice.
pub async fn run(cfg: &JobConfig, opts: RunOptions) -> Result<RunSummary> {
    let session = acquire_session(&cfg.session).await?;

    let mut dataset = Dataset::load(&cfg.paths.input_csv)
        .with_context(|| format!("read input dataset {}", cfg.paths.input_csv.display()))?;

    let mut checkpoint = FileCheckpoint::new(&cfg.paths.checkpoint_file);
    let stored = if opts.from_start {
        None
    } else {
        checkpoint.load()?
    };
    let plan = ResumePlan::build(&dataset, stored.as_deref())?;
    restore_previous_output(&mut dataset, &plan, cfg);

    let portal = PortalClient::new(&cfg.portal)?;
    let materializer = HttpMaterializer::new(portal.http().clone(), cfg.converter.clone());
    let mut snapshots = CsvSnapshots::new(
        &cfg.paths.checkpoint_snapshot,
        &cfg.paths.final_snapshot,
    );

    let summary = RowProcessor::new(&portal, &materializer, &mut checkpoint, &mut snapshots)
        .with_flush_every(cfg.flush_every)
        .run(&mut dataset, &session, &plan)
        .await?;
    drop(session);

    match cfg.notify.recipient.as_deref() {
        Some(to) => {
            let message = Notification::completion(to, Local::now(), &summary);
            if let Err(e) = notifier(&cfg.notify).notify(&message).await {
                error!(error = %e, to, "completion notice failed");
            }
        }
        None => warn!("NOTIFY_TO not set; skipping completion notice"),
    }
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupReport {
    pub token: Option<String>,
    pub image_url: Option<String>,
}

/// Resolve a single product name without touching the dataset or checkpoint.
pub async fn lookup(cfg: &JobConfig, product_name: &str) -> Result<LookupReport> {
    let session = acquire_session(&cfg.session).await?;
    let portal = PortalClient::new(&cfg.portal)?;
    let token = portal.resolve_token(product_name, &session).await;
    let image_url = match &token {
        Some(t) => portal.resolve_image_url(t, &session).await,
        None => None,
    };
    info!(name = product_name, ?token, ?image_url, "lookup finished");
    Ok(LookupReport { token, image_url })
}
